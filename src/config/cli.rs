use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the Postline binary.
#[derive(Debug, Parser)]
#[command(
    name = "postline",
    version,
    about = "Postline caching and consistency engine"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "POSTLINE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the flush scheduler and the profile consumers.
    Serve(Box<ServeArgs>),
    /// Fold every buffered like delta into the stored counters once, then exit.
    Flush(FlushArgs),
    /// Apply pending SQL migrations, then exit.
    Migrate(MigrateArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct FlushArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Override the Redis connection URL.
    #[arg(long = "redis-url", value_name = "URL")]
    pub redis_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the Redis connection URL.
    #[arg(long = "redis-url", value_name = "URL")]
    pub redis_url: Option<String>,

    /// Use Redis (true) or the in-process store (false).
    #[arg(
        long = "redis-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub redis_enabled: Option<bool>,

    /// Override the NATS server URL.
    #[arg(long = "nats-url", value_name = "URL")]
    pub nats_url: Option<String>,

    /// Override the identity service base URL.
    #[arg(long = "identity-base-url", value_name = "URL")]
    pub identity_base_url: Option<String>,

    /// Override the like flush cron expression (six fields, seconds first).
    #[arg(long = "engagement-flush-schedule", value_name = "CRON")]
    pub engagement_flush_schedule: Option<String>,

    /// Override how many dirty entities are popped per flush round.
    #[arg(long = "engagement-flush-batch", value_name = "COUNT")]
    pub engagement_flush_batch: Option<u64>,
}
