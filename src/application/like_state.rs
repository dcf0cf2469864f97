//! Short-lived per-user "liked" flags in front of the membership tables.

use std::{sync::Arc, time::Duration};

use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::repos::{LikesRepo, RepoError};
use crate::cache::{CacheKey, KeyValueStore, KvError};
use crate::domain::types::EntityRef;

const LIKED: &str = "1";
const NOT_LIKED: &str = "0";

/// The liked flag could not be determined.
#[derive(Debug, Error)]
#[error("like state unavailable for {entity}: {source}")]
pub struct Degraded {
    pub entity: EntityRef,
    #[source]
    pub source: RepoError,
}

/// Retry schedule for transient membership reads.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Delay before attempt `n + 1` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

pub struct LikeStateCache {
    store: Arc<dyn KeyValueStore>,
    likes: Arc<dyn LikesRepo>,
    ttl: Duration,
    retry: RetryPolicy,
}

impl LikeStateCache {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        likes: Arc<dyn LikesRepo>,
        ttl: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            likes,
            ttl,
            retry,
        }
    }

    /// Whether `user_id` likes `entity`, failing open to `false`.
    pub async fn is_liked(&self, entity: EntityRef, user_id: Uuid) -> bool {
        match self.probe(entity, user_id).await {
            Ok(liked) => liked,
            Err(err) => {
                counter!("postline_like_state_degraded_total", "kind" => entity.kind.as_str())
                    .increment(1);
                warn!(
                    entity_kind = %entity.kind,
                    entity_id = entity.id,
                    user_id = %user_id,
                    error = %err,
                    "like state degraded; reporting not liked"
                );
                false
            }
        }
    }

    /// Reads the cached flag, falling back to the membership table and
    /// populating the cache on a miss.
    pub async fn probe(&self, entity: EntityRef, user_id: Uuid) -> Result<bool, Degraded> {
        let key = state_key(entity, user_id);

        match self.store.get(&key).await {
            Ok(Some(raw)) => match parse_flag(&raw) {
                Some(liked) => return Ok(liked),
                None => warn!(key = %key, value = %raw, "ignoring malformed like state"),
            },
            Ok(None) => {}
            Err(err) => warn!(key = %key, error = %err, "like state read failed"),
        }

        let liked = self
            .read_membership(entity, user_id)
            .await
            .map_err(|source| Degraded { entity, source })?;

        if let Err(err) = self.write_flag(&key, liked).await {
            warn!(key = %key, error = %err, "failed to cache like state");
        }
        Ok(liked)
    }

    /// Overwrites the cached flag after a membership change.
    pub async fn record(&self, entity: EntityRef, user_id: Uuid, liked: bool) -> Result<(), KvError> {
        self.write_flag(&state_key(entity, user_id), liked).await
    }

    async fn write_flag(&self, key: &str, liked: bool) -> Result<(), KvError> {
        let value = if liked { LIKED } else { NOT_LIKED };
        self.store.set_ex(key, value, self.ttl).await
    }

    async fn read_membership(&self, entity: EntityRef, user_id: Uuid) -> Result<bool, RepoError> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.likes.like_exists(entity, user_id).await {
                Ok(exists) => return Ok(exists),
                Err(err) if err.is_transient() && attempt < attempts => {
                    let delay = self.retry.backoff * attempt;
                    debug!(
                        entity_kind = %entity.kind,
                        entity_id = entity.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "membership store busy; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn state_key(entity: EntityRef, user_id: Uuid) -> String {
    CacheKey::LikeState {
        kind: entity.kind,
        user: user_id,
        id: entity.id,
    }
    .to_string()
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}
