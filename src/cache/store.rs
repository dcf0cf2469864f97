//! Key-value store abstraction shared by the read-through cache, the like
//! state cache, and the counter aggregator.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("key-value backend error: {0}")]
    Backend(String),
    #[error("failed to encode value for `{key}`: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode value for `{key}`: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("value at `{key}` is not an integer")]
    NotAnInteger { key: String },
}

impl KvError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Minimal command set the engine needs from a key-value server.
///
/// Structured values travel as JSON text; counters and booleans as raw
/// scalars so the backend can operate on them atomically.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError>;

    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> Result<bool, KvError>;

    /// Adds `delta` to the integer at `key` (missing keys count as zero).
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, KvError>;

    /// Reads and removes `key` in one step.
    async fn get_del(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Lists keys matching a glob pattern without blocking the server.
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, KvError>;

    async fn set_add(&self, key: &str, member: &str) -> Result<(), KvError>;

    /// Removes and returns up to `count` arbitrary members.
    async fn set_pop(&self, key: &str, count: usize) -> Result<Vec<String>, KvError>;

    /// Applies `delta` to `counter_key` and records `member` in `index_key`
    /// as one atomic unit.
    async fn incr_and_index(
        &self,
        counter_key: &str,
        delta: i64,
        index_key: &str,
        member: &str,
    ) -> Result<i64, KvError>;
}

/// Typed helpers layered over [`KeyValueStore`].
#[async_trait]
pub trait KeyValueStoreExt: KeyValueStore {
    async fn get_json<T>(&self, key: &str) -> Result<Option<T>, KvError>
    where
        T: DeserializeOwned,
    {
        match self.get(key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| KvError::Decode {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    async fn set_json_ex<T>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), KvError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let payload = serde_json::to_string(value).map_err(|source| KvError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.set_ex(key, &payload, ttl).await
    }

    async fn decr_by(&self, key: &str, delta: i64) -> Result<i64, KvError> {
        self.incr_by(key, -delta).await
    }

    async fn get_i64(&self, key: &str) -> Result<Option<i64>, KvError> {
        match self.get(key).await? {
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| KvError::NotAnInteger {
                    key: key.to_string(),
                }),
            None => Ok(None),
        }
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStoreExt for S {}
