//! Write-behind like counters.
//!
//! Membership rows are written immediately; the matching +1/-1 lands in a
//! per-entity delta key together with a dirty-index entry. A periodic flush
//! pops the dirty index, reads and clears each delta atomically, and folds it
//! into the denormalized counter with a clamped update. A failed apply puts
//! the delta back so the next flush retries it.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use metrics::{counter, histogram};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::application::{
    error::AppError,
    like_state::LikeStateCache,
    repos::LikesRepo,
};
use crate::cache::{
    KeyValueStore, KeyValueStoreExt, delta_key_pattern, dirty_index_key, likes_delta_key,
    parse_delta_key,
};
use crate::domain::types::{EntityKind, EntityRef};

const SOURCE: &str = "application::engagement";
pub const DEFAULT_FLUSH_BATCH: usize = 500;

/// Outcome counters of one flush run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Another flush was already running, nothing was done.
    pub skipped: bool,
    pub applied: usize,
    pub failed: usize,
    /// Index members or delta values that could not be parsed.
    pub malformed: usize,
    pub net_delta: i64,
}

pub struct EngagementService {
    likes: Arc<dyn LikesRepo>,
    store: Arc<dyn KeyValueStore>,
    like_state: Arc<LikeStateCache>,
    flushing: AtomicBool,
    batch: usize,
}

struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl EngagementService {
    pub fn new(
        likes: Arc<dyn LikesRepo>,
        store: Arc<dyn KeyValueStore>,
        like_state: Arc<LikeStateCache>,
        batch: usize,
    ) -> Self {
        Self {
            likes,
            store,
            like_state,
            flushing: AtomicBool::new(false),
            batch: batch.max(1),
        }
    }

    pub fn like_state(&self) -> &Arc<LikeStateCache> {
        &self.like_state
    }

    pub async fn like(&self, entity: EntityRef, user_id: Uuid) -> Result<(), AppError> {
        let inserted = self
            .likes
            .insert_like(entity, user_id)
            .await
            .map_err(|err| {
                error!(entity_kind = %entity.kind, entity_id = entity.id, user_id = %user_id, error = %err, "failed to insert like");
                AppError::Internal
            })?;
        if !inserted {
            return Err(AppError::AlreadyLiked);
        }

        self.buffer_change(entity, user_id, 1).await
    }

    pub async fn unlike(&self, entity: EntityRef, user_id: Uuid) -> Result<(), AppError> {
        let removed = self
            .likes
            .delete_like(entity, user_id)
            .await
            .map_err(|err| {
                error!(entity_kind = %entity.kind, entity_id = entity.id, user_id = %user_id, error = %err, "failed to delete like");
                AppError::Internal
            })?;
        if !removed {
            return Err(AppError::NotLiked);
        }

        self.buffer_change(entity, user_id, -1).await
    }

    /// Net change not yet folded into the stored counter.
    pub async fn pending_delta(&self, entity: EntityRef) -> Result<i64, AppError> {
        let key = likes_delta_key(entity.kind, entity.id);
        self.store
            .get_i64(&key)
            .await
            .map(|value| value.unwrap_or(0))
            .map_err(|err| AppError::internal(SOURCE, err))
    }

    async fn buffer_change(
        &self,
        entity: EntityRef,
        user_id: Uuid,
        delta: i64,
    ) -> Result<(), AppError> {
        if let Err(err) = self
            .like_state
            .record(entity, user_id, delta > 0)
            .await
        {
            warn!(entity_kind = %entity.kind, entity_id = entity.id, user_id = %user_id, error = %err, "failed to record like state");
        }

        let delta_key = likes_delta_key(entity.kind, entity.id);
        self.store
            .incr_and_index(
                &delta_key,
                delta,
                &dirty_index_key(entity.kind),
                &entity.id.to_string(),
            )
            .await
            .map_err(|err| {
                error!(
                    entity_kind = %entity.kind,
                    entity_id = entity.id,
                    user_id = %user_id,
                    delta,
                    error = %err,
                    "failed to buffer like delta; counter will drift until reconciled"
                );
                AppError::Internal
            })?;
        Ok(())
    }

    /// Folds every buffered delta into the stored counters.
    ///
    /// Runs at most once at a time per service; an overlapping call returns a
    /// skipped report immediately.
    #[instrument(skip(self))]
    pub async fn flush_once(&self) -> FlushReport {
        if self
            .flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("flush already running; skipping");
            return FlushReport {
                skipped: true,
                ..FlushReport::default()
            };
        }
        let _guard = FlushGuard(&self.flushing);

        let started = Instant::now();
        let mut report = FlushReport::default();
        for kind in EntityKind::ALL {
            self.flush_kind(kind, &mut report).await;
        }

        histogram!("postline_flush_ms").record(started.elapsed().as_secs_f64() * 1000.0);
        counter!("postline_likes_flushed_total").increment(report.applied as u64);
        if report.applied > 0 || report.failed > 0 {
            info!(
                applied = report.applied,
                failed = report.failed,
                malformed = report.malformed,
                net_delta = report.net_delta,
                "flushed like deltas"
            );
        }
        report
    }

    async fn flush_kind(&self, kind: EntityKind, report: &mut FlushReport) {
        let index_key = dirty_index_key(kind);
        let mut retry_later = Vec::new();

        loop {
            let members = match self.store.set_pop(&index_key, self.batch).await {
                Ok(members) => members,
                Err(err) => {
                    error!(entity_kind = %kind, error = %err, "failed to read dirty index");
                    break;
                }
            };
            if members.is_empty() {
                break;
            }

            for member in members {
                let Ok(id) = member.parse::<i64>() else {
                    warn!(entity_kind = %kind, member = %member, "skipping malformed dirty index member");
                    report.malformed += 1;
                    continue;
                };
                let entity = EntityRef { kind, id };
                match self.flush_entity(entity).await {
                    Ok(Some(delta)) => {
                        report.applied += 1;
                        report.net_delta += delta;
                    }
                    Ok(None) => {}
                    Err(FlushFailure::Malformed) => report.malformed += 1,
                    Err(FlushFailure::Retry) => {
                        report.failed += 1;
                        retry_later.push(member);
                    }
                }
            }
        }

        // Re-index after draining so a persistent failure cannot spin this run.
        for member in retry_later {
            if let Err(err) = self.store.set_add(&index_key, &member).await {
                error!(entity_kind = %kind, member = %member, error = %err, "failed to re-index like delta");
            }
        }
    }

    async fn flush_entity(&self, entity: EntityRef) -> Result<Option<i64>, FlushFailure> {
        let key = likes_delta_key(entity.kind, entity.id);
        let raw = match self.store.get_del(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(err) => {
                error!(key = %key, error = %err, "failed to take like delta");
                return Err(FlushFailure::Retry);
            }
        };

        let Ok(delta) = raw.trim().parse::<i64>() else {
            warn!(key = %key, value = %raw, "dropping malformed like delta");
            return Err(FlushFailure::Malformed);
        };
        if delta == 0 {
            return Ok(None);
        }

        match self.likes.apply_likes_delta(entity, delta).await {
            Ok(()) => Ok(Some(delta)),
            Err(err) => {
                error!(
                    entity_kind = %entity.kind,
                    entity_id = entity.id,
                    delta,
                    error = %err,
                    "failed to apply like delta; restoring"
                );
                if let Err(restore_err) = self.store.incr_by(&key, delta).await {
                    error!(key = %key, delta, error = %restore_err, "failed to restore like delta");
                }
                Err(FlushFailure::Retry)
            }
        }
    }

    /// Re-indexes delta keys that have no dirty-index entry, such as those
    /// left behind by a process that stopped mid-flush. Returns the number of
    /// keys indexed.
    pub async fn sweep_orphans(&self) -> Result<usize, AppError> {
        let mut indexed = 0;
        for kind in EntityKind::ALL {
            let keys = self
                .store
                .scan_keys(&delta_key_pattern(kind))
                .await
                .map_err(|err| AppError::internal(SOURCE, err))?;
            let index_key = dirty_index_key(kind);
            for key in keys {
                let Some(id) = parse_delta_key(kind, &key) else {
                    continue;
                };
                self.store
                    .set_add(&index_key, &id.to_string())
                    .await
                    .map_err(|err| AppError::internal(SOURCE, err))?;
                indexed += 1;
            }
        }
        if indexed > 0 {
            info!(indexed, "re-indexed orphaned like deltas");
        }
        Ok(indexed)
    }
}

enum FlushFailure {
    Malformed,
    Retry,
}
