//! Tests for configuration layering: defaults, `repository.toml`, environment.

mod support;

use std::io::Write;
use std::time::Duration;

use heartify_rust::config::{ServerConfig, DEFAULT_PORT};
use heartify_rust::db::repository::SampleRepository;
use heartify_rust::db::{RepositoryConfig, RepositoryFactory, RepositoryType};

const REALTIME_VARS: [&str; 8] = [
    "HOST",
    "PORT",
    "HEARTIFY_CONNECTION_QUEUE",
    "HEARTIFY_LEGACY_BROADCAST",
    "HEARTIFY_RECONNECT_INITIAL_MS",
    "HEARTIFY_RECONNECT_MAX_MS",
    "HEARTIFY_RECONNECT_MULTIPLIER",
    "HEARTIFY_AGGREGATE_REFRESH_SECS",
];

fn cleared() -> Vec<(&'static str, Option<&'static str>)> {
    REALTIME_VARS.iter().map(|k| (*k, None)).collect()
}

#[test]
fn test_server_defaults_without_env() {
    support::with_scoped_env(&cleared(), || {
        let config = ServerConfig::from_env();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.host, "0.0.0.0");
        assert!(config.realtime.legacy_broadcast);
        assert_eq!(config.realtime.connection_queue_capacity, 64);
    });
}

#[test]
fn test_env_overrides_realtime_settings() {
    let mut env = cleared();
    env.extend([
        ("PORT", Some("7000")),
        ("HEARTIFY_CONNECTION_QUEUE", Some("8")),
        ("HEARTIFY_LEGACY_BROADCAST", Some("off")),
        ("HEARTIFY_RECONNECT_INITIAL_MS", Some("250")),
        ("HEARTIFY_AGGREGATE_REFRESH_SECS", Some("5")),
    ]);
    support::with_scoped_env(&env, || {
        let config = ServerConfig::from_env();
        assert_eq!(config.port, 7000);
        assert_eq!(config.realtime.connection_queue_capacity, 8);
        assert!(!config.realtime.legacy_broadcast);
        assert_eq!(
            config.realtime.reconnect.initial_delay(),
            Duration::from_millis(250)
        );
        assert_eq!(
            config.realtime.aggregate_refresh_interval(),
            Duration::from_secs(5)
        );
    });
}

#[test]
fn test_invalid_env_values_fall_back() {
    let mut env = cleared();
    env.extend([
        ("PORT", Some("not-a-port")),
        ("HEARTIFY_LEGACY_BROADCAST", Some("maybe")),
        ("HEARTIFY_CONNECTION_QUEUE", Some("0")),
    ]);
    support::with_scoped_env(&env, || {
        let config = ServerConfig::from_env();
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.realtime.legacy_broadcast);
        assert_eq!(config.realtime.connection_queue_capacity, 1);
    });
}

#[test]
fn test_file_realtime_section_is_overridden_by_env() {
    let toml = r#"
        [repository]
        type = "local"

        [realtime]
        connection_queue_capacity = 128
        legacy_broadcast = false

        [realtime.reconnect]
        max_delay_ms = 5000
    "#;
    let file = RepositoryConfig::from_toml_str(toml).unwrap();

    let mut env = cleared();
    env.push(("HEARTIFY_CONNECTION_QUEUE", Some("16")));
    support::with_scoped_env(&env, || {
        let config = ServerConfig::load(Some(&file));
        assert_eq!(config.realtime.connection_queue_capacity, 16);
        assert!(!config.realtime.legacy_broadcast);
        assert_eq!(config.realtime.reconnect.max_delay_ms, 5000);
        assert_eq!(config.realtime.reconnect.initial_delay_ms, 500);
    });
}

#[tokio::test]
async fn test_local_repository_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[repository]\ntype = \"memory\"").unwrap();

    let config = RepositoryConfig::from_file(file.path()).unwrap();
    assert_eq!(config.repository_type().unwrap(), RepositoryType::Local);

    let repo = RepositoryFactory::from_config_file(file.path()).await.unwrap();
    assert!(repo.health_check().await.unwrap());
}

#[tokio::test]
async fn test_unknown_repository_type_is_configuration_error() {
    let config = RepositoryConfig::from_toml_str("[repository]\ntype = \"cassandra\"").unwrap();
    let err = RepositoryFactory::from_repository_config(&config)
        .await
        .err()
        .expect("unknown type should fail");
    assert!(err.to_string().contains("cassandra"));
}

#[test]
fn test_repository_type_from_env() {
    support::with_scoped_env(&[("REPOSITORY_TYPE", Some("local"))], || {
        assert_eq!(RepositoryType::from_env(), RepositoryType::Local);
    });
}
