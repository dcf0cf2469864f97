//! Redis implementation of [`KeyValueStore`].

use std::time::Duration;

use async_trait::async_trait;
use redis::{RedisError, aio::ConnectionManager};
use tracing::info;

use crate::cache::{KeyValueStore, KvError};
use crate::infra::error::InfraError;

const SCAN_COUNT: usize = 500;

/// Multiplexed connection shared by every caller; clones are cheap.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, InfraError> {
        let client =
            redis::Client::open(url).map_err(|err| InfraError::key_value(err.to_string()))?;
        let mut conn = ConnectionManager::new(client)
            .await
            .map_err(|err| InfraError::key_value(err.to_string()))?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|err| InfraError::key_value(err.to_string()))?;
        info!("connected to redis");
        Ok(Self { conn })
    }
}

fn map_redis_error(key: &str, err: RedisError) -> KvError {
    if err.to_string().contains("not an integer") {
        return KvError::NotAnInteger {
            key: key.to_string(),
        };
    }
    KvError::backend(err)
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(KvError::backend)?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(KvError::backend)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(KvError::backend)?;
        Ok(removed > 0)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, KvError> {
        let mut conn = self.conn.clone();
        let value: i64 = redis::cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .query_async(&mut conn)
            .await
            .map_err(|err| map_redis_error(key, err))?;
        Ok(value)
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(KvError::backend)?;
        Ok(value)
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, KvError> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(KvError::backend)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once.
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(KvError::backend)?;
        Ok(())
    }

    async fn set_pop(&self, key: &str, count: usize) -> Result<Vec<String>, KvError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("SPOP")
            .arg(key)
            .arg(count.max(1))
            .query_async(&mut conn)
            .await
            .map_err(KvError::backend)?;
        Ok(members)
    }

    async fn incr_and_index(
        &self,
        counter_key: &str,
        delta: i64,
        index_key: &str,
        member: &str,
    ) -> Result<i64, KvError> {
        let mut conn = self.conn.clone();
        let (value,): (i64,) = redis::pipe()
            .atomic()
            .cmd("INCRBY")
            .arg(counter_key)
            .arg(delta)
            .cmd("SADD")
            .arg(index_key)
            .arg(member)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|err| map_redis_error(counter_key, err))?;
        Ok(value)
    }
}
