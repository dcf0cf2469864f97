use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.nats.url = Some("nats://file:4222".to_string());
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        nats_url: Some("nats://cli:4222".to_string()),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.nats.url, "nats://cli:4222");
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn cache_settings_use_documented_defaults() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.cache.post_ttl, Duration::from_secs(1800));
    assert_eq!(settings.cache.comments_ttl, Duration::from_secs(60));
    assert_eq!(settings.cache.author_posts_ttl, Duration::from_secs(3600));
    assert_eq!(settings.cache.user_likes_ttl, Duration::from_secs(3600));
    assert_eq!(settings.cache.search_ttl, Duration::from_secs(60));
    assert_eq!(settings.cache.profile_ttl, Duration::from_secs(3600));
    assert_eq!(settings.cache.like_state_ttl, Duration::from_secs(60));
    assert_eq!(settings.cache.trending_max_hours.get(), 168);
    assert_eq!(settings.cache.page_limit_max.get(), 5);
}

#[test]
fn unset_cache_keys_fall_back_to_cache_config_defaults() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
    assert_eq!(CacheConfig::from(&settings.cache), CacheConfig::default());

    let mut raw = RawSettings::default();
    raw.cache.profile = Some(120);
    let settings = Settings::from_raw(raw).expect("valid settings");
    let config = CacheConfig::from(&settings.cache);
    assert_eq!(config.profile_ttl, Duration::from_secs(120));
    assert_eq!(config.post_ttl, CacheConfig::default().post_ttl);
}

#[test]
fn engagement_settings_use_documented_defaults() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.engagement.flush_batch.get(), 500);
    assert_eq!(settings.engagement.is_liked_attempts.get(), 3);
    assert_eq!(
        settings.engagement.is_liked_backoff,
        Duration::from_millis(100)
    );
    assert!(settings.engagement.sweep_on_start);
    assert!(settings.redis.enabled);
    assert_eq!(settings.nats.profile_updates_stream, "USER_PROFILES");
    assert_eq!(settings.nats.profile_updates_subject, "users.info.updated");
}

#[test]
fn zero_ttl_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.like_state = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero ttl");
    assert!(matches!(err, LoadError::Invalid { key: "cache.like_state", .. }));
}

#[test]
fn zero_attempts_are_rejected() {
    let mut raw = RawSettings::default();
    raw.engagement.is_liked_attempts = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero attempts");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "engagement.is_liked_attempts",
            ..
        }
    ));
}

#[test]
fn unparsable_flush_schedule_is_rejected() {
    let mut raw = RawSettings::default();
    raw.engagement.flush_schedule = Some("every two minutes".to_string());

    let err = Settings::from_raw(raw).expect_err("bad cron");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "engagement.flush_schedule",
            ..
        }
    ));
}

#[test]
fn bad_log_level_is_rejected() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("loud".to_string());

    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "logging.level",
            ..
        })
    ));
}

#[test]
fn blank_database_url_is_treated_as_missing() {
    let mut raw = RawSettings::default();
    raw.database.url = Some("   ".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.database.url.is_none());
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn redis_can_be_disabled_via_cli() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        redis_enabled: Some(false),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(!settings.redis.enabled);
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["postline"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_flush_arguments() {
    let args = CliArgs::parse_from([
        "postline",
        "flush",
        "--database-url",
        "postgres://example",
        "--redis-url",
        "redis://example:6379",
    ]);

    match args.command.expect("flush command") {
        Command::Flush(flush) => {
            assert_eq!(
                flush.database.database_url.as_deref(),
                Some("postgres://example")
            );
            assert_eq!(flush.redis_url.as_deref(), Some("redis://example:6379"));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_migrate_arguments() {
    let args = CliArgs::parse_from(["postline", "migrate", "--database-url", "postgres://example"]);

    match args.command.expect("migrate command") {
        Command::Migrate(migrate) => {
            assert_eq!(
                migrate.database.database_url.as_deref(),
                Some("postgres://example")
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "postline",
        "serve",
        "--redis-enabled=false",
        "--engagement-flush-schedule",
        "*/30 * * * * *",
        "--database-url",
        "postgres://override",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.redis_enabled, Some(false));
            assert_eq!(
                serve.overrides.engagement_flush_schedule.as_deref(),
                Some("*/30 * * * * *")
            );
            assert_eq!(
                serve.overrides.database_url.as_deref(),
                Some("postgres://override")
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
#[serial_test::serial]
fn environment_overrides_built_in_defaults() {
    // SAFETY: serialized with every other test that touches the environment.
    unsafe { std::env::set_var("POSTLINE__NATS__URL", "nats://env:4222") };
    let loaded = load(&CliArgs::parse_from(["postline"]));
    unsafe { std::env::remove_var("POSTLINE__NATS__URL") };

    let settings = loaded.expect("valid settings");
    assert_eq!(settings.nats.url, "nats://env:4222");
}

#[test]
#[serial_test::serial]
fn cli_flag_beats_environment() {
    // SAFETY: serialized with every other test that touches the environment.
    unsafe { std::env::set_var("POSTLINE__NATS__URL", "nats://env:4222") };
    let loaded = load(&CliArgs::parse_from([
        "postline",
        "serve",
        "--nats-url",
        "nats://cli:4222",
    ]));
    unsafe { std::env::remove_var("POSTLINE__NATS__URL") };

    assert_eq!(loaded.expect("valid settings").nats.url, "nats://cli:4222");
}
