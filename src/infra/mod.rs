//! Infrastructure adapters and runtime bootstrap.

pub mod db;
pub mod error;
pub mod identity;
pub mod nats;
pub mod redis;
pub mod telemetry;
