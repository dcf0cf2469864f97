//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

pub use cli::{
    CliArgs, Command, DatabaseOverride, FlushArgs, MigrateArgs, ServeArgs, ServeOverrides,
};

use std::{
    num::{NonZeroU32, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use apalis_cron::Schedule;
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::jobs::{DEFAULT_FLUSH_SCHEDULE, flush_likes_schedule};
use crate::cache::CacheConfig;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "postline";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_DB_ACQUIRE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_NATS_URL: &str = "nats://127.0.0.1:4222";
const DEFAULT_PROFILE_UPDATES_STREAM: &str = "USER_PROFILES";
const DEFAULT_PROFILE_UPDATES_SUBJECT: &str = "users.info.updated";
const DEFAULT_USERS_CREATED_SUBJECT: &str = "users.created";
const DEFAULT_POST_CREATED_SUBJECT: &str = "posts.created";
const DEFAULT_CONSUMER_NAME: &str = "postline-profiles";
const DEFAULT_NATS_FETCH_BATCH: u64 = 50;
const DEFAULT_NATS_FETCH_EXPIRES_MS: u64 = 5_000;
const DEFAULT_IDENTITY_BASE_URL: &str = "http://127.0.0.1:8081";
const DEFAULT_IDENTITY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_FLUSH_BATCH: u64 = 500;
const DEFAULT_IS_LIKED_ATTEMPTS: u64 = 3;
const DEFAULT_IS_LIKED_BACKOFF_MS: u64 = 100;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub nats: NatsSettings,
    pub identity: IdentitySettings,
    pub cache: CacheSettings,
    pub engagement: EngagementSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RedisSettings {
    pub url: String,
    /// `false` selects the in-process store.
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct NatsSettings {
    pub url: String,
    pub profile_updates_stream: String,
    pub profile_updates_subject: String,
    pub users_created_subject: String,
    pub post_created_subject: String,
    pub consumer_name: String,
    pub fetch_batch: usize,
    pub fetch_expires: Duration,
}

#[derive(Debug, Clone)]
pub struct IdentitySettings {
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub post_ttl: Duration,
    pub comments_ttl: Duration,
    pub author_posts_ttl: Duration,
    pub user_likes_ttl: Duration,
    pub search_ttl: Duration,
    pub profile_ttl: Duration,
    pub like_state_ttl: Duration,
    pub trending_max_hours: NonZeroU32,
    pub page_limit_max: NonZeroU32,
    pub memory_capacity: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct EngagementSettings {
    pub flush_schedule: Schedule,
    pub flush_batch: NonZeroUsize,
    pub is_liked_attempts: NonZeroU32,
    pub is_liked_backoff: Duration,
    pub sweep_on_start: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("POSTLINE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Flush(args)) => {
            raw.apply_database_override(&args.database);
            if let Some(url) = args.redis_url.as_ref() {
                raw.redis.url = Some(url.clone());
            }
        }
        Some(Command::Migrate(args)) => raw.apply_database_override(&args.database),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    redis: RawRedisSettings,
    nats: RawNatsSettings,
    identity: RawIdentitySettings,
    cache: RawCacheSettings,
    engagement: RawEngagementSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(url) = overrides.redis_url.as_ref() {
            self.redis.url = Some(url.clone());
        }
        if let Some(enabled) = overrides.redis_enabled {
            self.redis.enabled = Some(enabled);
        }
        if let Some(url) = overrides.nats_url.as_ref() {
            self.nats.url = Some(url.clone());
        }
        if let Some(url) = overrides.identity_base_url.as_ref() {
            self.identity.base_url = Some(url.clone());
        }
        if let Some(schedule) = overrides.engagement_flush_schedule.as_ref() {
            self.engagement.flush_schedule = Some(schedule.clone());
        }
        if let Some(batch) = overrides.engagement_flush_batch {
            self.engagement.flush_batch = Some(batch);
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            redis,
            nats,
            identity,
            cache,
            engagement,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let database = build_database_settings(database)?;
        let redis = build_redis_settings(redis)?;
        let nats = build_nats_settings(nats)?;
        let identity = build_identity_settings(identity)?;
        let cache = build_cache_settings(cache)?;
        let engagement = build_engagement_settings(engagement)?;

        Ok(Self {
            logging,
            database,
            redis,
            nats,
            identity,
            cache,
            engagement,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = non_blank(database.url);

    let max_value = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
    let max_connections = non_zero_u32(max_value.into(), "database.max_connections")?;

    let acquire_timeout = seconds(
        database.acquire_timeout_seconds,
        DEFAULT_DB_ACQUIRE_TIMEOUT_SECS,
        "database.acquire_timeout_seconds",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
        acquire_timeout,
    })
}

fn build_redis_settings(redis: RawRedisSettings) -> Result<RedisSettings, LoadError> {
    let url = required_text(redis.url, DEFAULT_REDIS_URL, "redis.url")?;
    Ok(RedisSettings {
        url,
        enabled: redis.enabled.unwrap_or(true),
    })
}

fn build_nats_settings(nats: RawNatsSettings) -> Result<NatsSettings, LoadError> {
    let fetch_batch = non_zero_usize(
        nats.fetch_batch.unwrap_or(DEFAULT_NATS_FETCH_BATCH),
        "nats.fetch_batch",
    )?;
    let fetch_expires_ms = nats.fetch_expires_ms.unwrap_or(DEFAULT_NATS_FETCH_EXPIRES_MS);
    if fetch_expires_ms == 0 {
        return Err(LoadError::invalid(
            "nats.fetch_expires_ms",
            "must be greater than zero",
        ));
    }

    Ok(NatsSettings {
        url: required_text(nats.url, DEFAULT_NATS_URL, "nats.url")?,
        profile_updates_stream: required_text(
            nats.profile_updates_stream,
            DEFAULT_PROFILE_UPDATES_STREAM,
            "nats.profile_updates_stream",
        )?,
        profile_updates_subject: required_text(
            nats.profile_updates_subject,
            DEFAULT_PROFILE_UPDATES_SUBJECT,
            "nats.profile_updates_subject",
        )?,
        users_created_subject: required_text(
            nats.users_created_subject,
            DEFAULT_USERS_CREATED_SUBJECT,
            "nats.users_created_subject",
        )?,
        post_created_subject: required_text(
            nats.post_created_subject,
            DEFAULT_POST_CREATED_SUBJECT,
            "nats.post_created_subject",
        )?,
        consumer_name: required_text(
            nats.consumer_name,
            DEFAULT_CONSUMER_NAME,
            "nats.consumer_name",
        )?,
        fetch_batch: fetch_batch.get(),
        fetch_expires: Duration::from_millis(fetch_expires_ms),
    })
}

fn build_identity_settings(identity: RawIdentitySettings) -> Result<IdentitySettings, LoadError> {
    Ok(IdentitySettings {
        base_url: required_text(
            identity.base_url,
            DEFAULT_IDENTITY_BASE_URL,
            "identity.base_url",
        )?,
        timeout: seconds(
            identity.timeout_seconds,
            DEFAULT_IDENTITY_TIMEOUT_SECS,
            "identity.timeout_seconds",
        )?,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let defaults = CacheConfig::default();
    Ok(CacheSettings {
        post_ttl: seconds(cache.post, defaults.post_ttl.as_secs(), "cache.post")?,
        comments_ttl: seconds(
            cache.comments,
            defaults.comments_ttl.as_secs(),
            "cache.comments",
        )?,
        author_posts_ttl: seconds(
            cache.author_posts,
            defaults.author_posts_ttl.as_secs(),
            "cache.author_posts",
        )?,
        user_likes_ttl: seconds(
            cache.user_likes,
            defaults.user_likes_ttl.as_secs(),
            "cache.user_likes",
        )?,
        search_ttl: seconds(cache.search, defaults.search_ttl.as_secs(), "cache.search")?,
        profile_ttl: seconds(cache.profile, defaults.profile_ttl.as_secs(), "cache.profile")?,
        like_state_ttl: seconds(
            cache.like_state,
            defaults.like_state_ttl.as_secs(),
            "cache.like_state",
        )?,
        trending_max_hours: non_zero_u32(
            cache
                .trending_max_hours
                .unwrap_or(u64::from(defaults.trending_max_hours)),
            "cache.trending_max_hours",
        )?,
        page_limit_max: non_zero_u32(
            cache
                .page_limit_max
                .unwrap_or(u64::from(defaults.page_limit_max)),
            "cache.page_limit_max",
        )?,
        memory_capacity: match cache.memory_capacity {
            Some(capacity) => non_zero_usize(capacity, "cache.memory_capacity")?,
            None => defaults.memory_capacity,
        },
    })
}

fn build_engagement_settings(
    engagement: RawEngagementSettings,
) -> Result<EngagementSettings, LoadError> {
    let expression = engagement
        .flush_schedule
        .unwrap_or_else(|| DEFAULT_FLUSH_SCHEDULE.to_string());
    let flush_schedule = flush_likes_schedule(expression.trim())
        .map_err(|err| LoadError::invalid("engagement.flush_schedule", err.message))?;

    let flush_batch = non_zero_usize(
        engagement.flush_batch.unwrap_or(DEFAULT_FLUSH_BATCH),
        "engagement.flush_batch",
    )?;
    let is_liked_attempts = non_zero_u32(
        engagement
            .is_liked_attempts
            .unwrap_or(DEFAULT_IS_LIKED_ATTEMPTS),
        "engagement.is_liked_attempts",
    )?;
    let backoff_ms = engagement
        .is_liked_backoff_ms
        .unwrap_or(DEFAULT_IS_LIKED_BACKOFF_MS);

    Ok(EngagementSettings {
        flush_schedule,
        flush_batch,
        is_liked_attempts,
        is_liked_backoff: Duration::from_millis(backoff_ms),
        sweep_on_start: engagement.sweep_on_start.unwrap_or(true),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
    acquire_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRedisSettings {
    url: Option<String>,
    enabled: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawNatsSettings {
    url: Option<String>,
    profile_updates_stream: Option<String>,
    profile_updates_subject: Option<String>,
    users_created_subject: Option<String>,
    post_created_subject: Option<String>,
    consumer_name: Option<String>,
    fetch_batch: Option<u64>,
    fetch_expires_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawIdentitySettings {
    base_url: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    post: Option<u64>,
    comments: Option<u64>,
    author_posts: Option<u64>,
    user_likes: Option<u64>,
    search: Option<u64>,
    profile: Option<u64>,
    like_state: Option<u64>,
    trending_max_hours: Option<u64>,
    page_limit_max: Option<u64>,
    memory_capacity: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEngagementSettings {
    flush_schedule: Option<String>,
    flush_batch: Option<u64>,
    is_liked_attempts: Option<u64>,
    is_liked_backoff_ms: Option<u64>,
    sweep_on_start: Option<bool>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn required_text(
    value: Option<String>,
    default: &str,
    key: &'static str,
) -> Result<String, LoadError> {
    match value {
        None => Ok(default.to_string()),
        Some(value) => non_blank(Some(value))
            .ok_or_else(|| LoadError::invalid(key, "must not be empty")),
    }
}

fn seconds(value: Option<u64>, default: u64, key: &'static str) -> Result<Duration, LoadError> {
    let secs = value.unwrap_or(default);
    if secs == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(secs))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value_usize: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value_usize)
        .ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
