//! Postline cache layer.
//!
//! - **Key grammar** ([`CacheKey`] and the delta key helpers) shared by every
//!   reader and writer of the key-value store.
//! - **Stores**: the [`KeyValueStore`] trait with an in-process
//!   [`MemoryStore`]; the Redis implementation lives in `infra::redis`.
//! - **Read-through**: [`ReadThroughCache`] populates entries on miss with a
//!   fixed TTL and de-duplicates concurrent loads per key.

mod config;
mod keys;
mod lock;
mod memory;
mod read_through;
mod store;

pub use config::CacheConfig;
pub use keys::{CacheKey, delta_key_pattern, dirty_index_key, likes_delta_key, parse_delta_key};
pub use memory::MemoryStore;
pub use read_through::ReadThroughCache;
pub use store::{KeyValueStore, KeyValueStoreExt, KvError};
