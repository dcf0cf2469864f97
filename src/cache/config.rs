//! Cache lifetimes and listing bounds.

use std::{num::NonZeroUsize, time::Duration};

const DEFAULT_POST_TTL_SECS: u64 = 30 * 60;
const DEFAULT_COMMENTS_TTL_SECS: u64 = 60;
const DEFAULT_AUTHOR_POSTS_TTL_SECS: u64 = 60 * 60;
const DEFAULT_USER_LIKES_TTL_SECS: u64 = 60 * 60;
const DEFAULT_SEARCH_TTL_SECS: u64 = 60;
const DEFAULT_PROFILE_TTL_SECS: u64 = 60 * 60;
const DEFAULT_LIKE_STATE_TTL_SECS: u64 = 60;
const DEFAULT_TRENDING_MAX_HOURS: u32 = 7 * 24;
const DEFAULT_PAGE_LIMIT_MAX: u32 = 5;
const DEFAULT_MEMORY_CAPACITY: usize = 100_000;

/// Built-in defaults live in the [`Default`] impl; configuration falls back
/// to them for unset keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub post_ttl: Duration,
    /// Comment pages and reply pages.
    pub comments_ttl: Duration,
    pub author_posts_ttl: Duration,
    pub user_likes_ttl: Duration,
    pub search_ttl: Duration,
    pub profile_ttl: Duration,
    pub like_state_ttl: Duration,
    /// Trending windows are clamped to this many hours; the window also
    /// serves as the entry TTL.
    pub trending_max_hours: u32,
    pub page_limit_max: u32,
    /// Entry bound for the in-process store.
    pub memory_capacity: NonZeroUsize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            post_ttl: Duration::from_secs(DEFAULT_POST_TTL_SECS),
            comments_ttl: Duration::from_secs(DEFAULT_COMMENTS_TTL_SECS),
            author_posts_ttl: Duration::from_secs(DEFAULT_AUTHOR_POSTS_TTL_SECS),
            user_likes_ttl: Duration::from_secs(DEFAULT_USER_LIKES_TTL_SECS),
            search_ttl: Duration::from_secs(DEFAULT_SEARCH_TTL_SECS),
            profile_ttl: Duration::from_secs(DEFAULT_PROFILE_TTL_SECS),
            like_state_ttl: Duration::from_secs(DEFAULT_LIKE_STATE_TTL_SECS),
            trending_max_hours: DEFAULT_TRENDING_MAX_HOURS,
            page_limit_max: DEFAULT_PAGE_LIMIT_MAX,
            memory_capacity: NonZeroUsize::new(DEFAULT_MEMORY_CAPACITY)
                .unwrap_or(NonZeroUsize::MIN),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            post_ttl: settings.post_ttl,
            comments_ttl: settings.comments_ttl,
            author_posts_ttl: settings.author_posts_ttl,
            user_likes_ttl: settings.user_likes_ttl,
            search_ttl: settings.search_ttl,
            profile_ttl: settings.profile_ttl,
            like_state_ttl: settings.like_state_ttl,
            trending_max_hours: settings.trending_max_hours.get(),
            page_limit_max: settings.page_limit_max.get(),
            memory_capacity: settings.memory_capacity,
        }
    }
}

impl CacheConfig {
    /// Clamps a requested page size into `1..=page_limit_max`.
    pub fn clamp_limit(&self, requested: u32) -> u32 {
        requested.clamp(1, self.page_limit_max.max(1))
    }

    /// Clamps a trending window into `1..=trending_max_hours`.
    pub fn clamp_trending_hours(&self, requested: u32) -> u32 {
        requested.clamp(1, self.trending_max_hours.max(1))
    }

    pub fn trending_ttl(&self, hours: u32) -> Duration {
        Duration::from_secs(u64::from(self.clamp_trending_hours(hours)) * 3600)
    }
}
