//! Local replica of profiles owned by the identity service.
//!
//! Rows are created lazily on first use and kept current by broker events.
//! Reads go through the cache; every write clears the cached entry so the
//! next read sees the durable row.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::{
    error::AppError,
    repos::{ProfilesRepo, RepoError},
};
use crate::cache::{CacheConfig, CacheKey, ReadThroughCache};
use crate::domain::{entities::CachedProfile, error::DomainError, profile::ProfileUpdate};

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity service unreachable: {0}")]
    Transport(String),
    #[error("identity service answered {status}")]
    Status { status: u16, detail: Option<String> },
    #[error("identity response could not be decoded: {0}")]
    Decode(String),
}

/// Source of truth for profiles, queried with the caller's credential.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn fetch_current_user(&self, credential: &str) -> Result<CachedProfile, IdentityError>;
}

pub struct ProfileService {
    repo: Arc<dyn ProfilesRepo>,
    cache: Arc<ReadThroughCache>,
    identity: Arc<dyn IdentityProvider>,
    config: CacheConfig,
}

impl ProfileService {
    pub fn new(
        repo: Arc<dyn ProfilesRepo>,
        cache: Arc<ReadThroughCache>,
        identity: Arc<dyn IdentityProvider>,
        config: CacheConfig,
    ) -> Self {
        Self {
            repo,
            cache,
            identity,
            config,
        }
    }

    pub async fn find(&self, user_id: Uuid) -> Result<Option<CachedProfile>, AppError> {
        self.cache
            .get_or_load(&CacheKey::Profile(user_id), self.config.profile_ttl, || {
                self.repo.find_profile(user_id)
            })
            .await
            .map_err(|err| {
                error!(user_id = %user_id, error = %err, "failed to load profile");
                AppError::Internal
            })
    }

    /// Returns the replicated profile, fetching and persisting it from the
    /// identity service on first sight.
    pub async fn create_or_get(
        &self,
        user_id: Uuid,
        credential: &str,
    ) -> Result<CachedProfile, AppError> {
        if let Some(profile) = self.find(user_id).await? {
            return Ok(profile);
        }

        let fetched = self
            .identity
            .fetch_current_user(credential)
            .await
            .map_err(|err| {
                error!(user_id = %user_id, error = %err, "failed to fetch profile from identity service");
                AppError::Internal
            })?;
        if fetched.id != user_id {
            warn!(user_id = %user_id, fetched_id = %fetched.id, "credential belongs to another user");
            return Err(DomainError::validation("credential does not match user").into());
        }

        self.persist(&fetched).await?;
        Ok(fetched)
    }

    /// Inserts a complete profile; an existing row counts as success.
    pub async fn create(&self, profile: &CachedProfile) -> Result<(), AppError> {
        self.persist(profile).await
    }

    /// Validates loosely typed fields against the allow-list, then applies them.
    pub async fn update_fields(
        &self,
        user_id: Uuid,
        fields: &Map<String, Value>,
    ) -> Result<(), AppError> {
        let update = ProfileUpdate::from_json_fields(fields)?;
        self.update(user_id, &update).await
    }

    pub async fn update(&self, user_id: Uuid, update: &ProfileUpdate) -> Result<(), AppError> {
        if update.is_empty() {
            return Ok(());
        }

        let matched = self
            .repo
            .update_profile(user_id, update)
            .await
            .map_err(|err| {
                error!(user_id = %user_id, error = %err, "failed to update profile");
                AppError::Internal
            })?;
        if !matched {
            debug!(user_id = %user_id, "profile not replicated yet; update ignored");
        }

        self.invalidate(user_id).await;
        Ok(())
    }

    async fn persist(&self, profile: &CachedProfile) -> Result<(), AppError> {
        match self.repo.insert_profile(profile).await {
            Ok(()) => info!(user_id = %profile.id, "replicated profile"),
            Err(RepoError::Duplicate { .. }) => {
                debug!(user_id = %profile.id, "profile already replicated");
            }
            Err(err) => {
                error!(user_id = %profile.id, error = %err, "failed to persist profile");
                return Err(AppError::Internal);
            }
        }

        // A previous miss may have cached the negative marker.
        self.invalidate(profile.id).await;
        Ok(())
    }

    async fn invalidate(&self, user_id: Uuid) {
        if let Err(err) = self.cache.invalidate(&CacheKey::Profile(user_id)).await {
            warn!(user_id = %user_id, error = %err, "failed to invalidate cached profile");
        }
    }
}
