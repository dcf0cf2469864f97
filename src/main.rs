use std::{process, sync::Arc};

use postline::{
    application::{
        consumer::{ConsumerKind, MessageSource, ProfileConsumer},
        engagement::EngagementService,
        error::AppError,
        jobs::FlushScheduler,
        like_state::{LikeStateCache, RetryPolicy},
        profiles::{IdentityProvider, ProfileService},
        repos::{LikesRepo, ProfilesRepo},
    },
    cache::{CacheConfig, KeyValueStore, MemoryStore, ReadThroughCache},
    config,
    infra::{
        db::PostgresRepositories, error::InfraError, identity::HttpIdentityClient,
        nats::NatsBroker, redis::RedisStore, telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Flush(_) => run_flush(settings).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
    }
}

/// Services shared by the background tasks.
struct ApplicationContext {
    engagement: Arc<EngagementService>,
    profiles: Arc<ProfileService>,
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings, true).await?;
    let store = init_store(&settings).await?;
    let app = build_application_context(repositories, store, &settings)?;

    let broker = NatsBroker::connect(&settings.nats)
        .await
        .map_err(AppError::from)?;
    let mut consumers = Vec::new();
    for kind in [ConsumerKind::ProfileUpdates, ConsumerKind::UserCreated] {
        let source: Arc<dyn MessageSource> =
            Arc::new(broker.source(kind).await.map_err(AppError::from)?);
        let mut consumer = ProfileConsumer::new(kind, source, Arc::clone(&app.profiles));
        consumer.start();
        consumers.push(consumer);
    }

    let mut scheduler = FlushScheduler::new(
        Arc::clone(&app.engagement),
        settings.engagement.flush_schedule.clone(),
        settings.engagement.sweep_on_start,
    );
    scheduler.start().await;

    info!("postline running; press ctrl-c to stop");
    let signal = tokio::signal::ctrl_c().await;

    for consumer in &mut consumers {
        consumer.stop().await;
    }
    scheduler.stop().await;

    signal.map_err(|err| AppError::from(InfraError::from(err)))
}

async fn run_flush(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings, false).await?;
    let store = init_store(&settings).await?;
    let app = build_application_context(repositories, store, &settings)?;

    let swept = app.engagement.sweep_orphans().await?;
    let report = app.engagement.flush_once().await;
    info!(
        swept,
        applied = report.applied,
        failed = report.failed,
        malformed = report.malformed,
        net_delta = report.net_delta,
        "flush finished"
    );
    if report.failed > 0 {
        return Err(AppError::unexpected(format!(
            "{} like deltas could not be applied",
            report.failed
        )));
    }
    Ok(())
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    init_repositories(&settings, true).await?;
    info!("migrations applied");
    Ok(())
}

async fn init_repositories(
    settings: &config::Settings,
    migrate: bool,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepositories::connect(
        database_url,
        settings.database.max_connections.get(),
        settings.database.acquire_timeout,
    )
    .await
    .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    if migrate {
        PostgresRepositories::run_migrations(&pool)
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
    }

    let repositories = PostgresRepositories::new(pool);
    repositories
        .health_check()
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
    Ok(Arc::new(repositories))
}

async fn init_store(settings: &config::Settings) -> Result<Arc<dyn KeyValueStore>, AppError> {
    if settings.redis.enabled {
        let store = RedisStore::connect(&settings.redis.url)
            .await
            .map_err(AppError::from)?;
        return Ok(Arc::new(store));
    }

    info!(
        capacity = settings.cache.memory_capacity.get(),
        "redis disabled; using in-process store"
    );
    Ok(Arc::new(MemoryStore::new(settings.cache.memory_capacity)))
}

fn build_application_context(
    repositories: Arc<PostgresRepositories>,
    store: Arc<dyn KeyValueStore>,
    settings: &config::Settings,
) -> Result<ApplicationContext, AppError> {
    let likes_repo: Arc<dyn LikesRepo> = repositories.clone();
    let profiles_repo: Arc<dyn ProfilesRepo> = repositories;

    let cache_config = CacheConfig::from(&settings.cache);
    let read_through = Arc::new(ReadThroughCache::new(Arc::clone(&store)));

    let like_state = Arc::new(LikeStateCache::new(
        Arc::clone(&store),
        Arc::clone(&likes_repo),
        cache_config.like_state_ttl,
        RetryPolicy {
            attempts: settings.engagement.is_liked_attempts.get(),
            backoff: settings.engagement.is_liked_backoff,
        },
    ));
    let engagement = Arc::new(EngagementService::new(
        likes_repo,
        store,
        like_state,
        settings.engagement.flush_batch.get(),
    ));

    let identity: Arc<dyn IdentityProvider> = Arc::new(
        HttpIdentityClient::new(&settings.identity.base_url, settings.identity.timeout)
            .map_err(AppError::from)?,
    );
    let profiles = Arc::new(ProfileService::new(
        profiles_repo,
        read_through,
        identity,
        cache_config,
    ));

    Ok(ApplicationContext {
        engagement,
        profiles,
    })
}
