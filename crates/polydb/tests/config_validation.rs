mod common;

use polydb::{
    config_spec, default_registry, validate_config, BackendKind, ConnectionConfig, DataError,
    ErrorKind,
};

#[tokio::test]
async fn test_default_registry_has_every_backend() {
    let registry = default_registry().await.unwrap();
    assert_eq!(registry.list_backends().await, BackendKind::ALL.to_vec());
}

#[tokio::test]
async fn test_missing_keys_rejected_for_every_backend() {
    common::init_test_logging();
    let registry = default_registry().await.unwrap();

    // PostgreSQL defaults every key, so an empty config is valid there
    for backend in [BackendKind::Sqlite, BackendKind::MySql, BackendKind::MongoDb] {
        let err = registry
            .create_source(ConnectionConfig::new(backend))
            .await
            .err()
            .unwrap();

        assert_eq!(err.kind(), ErrorKind::Configuration, "{}", backend);
        match err {
            DataError::MissingConfiguration { backend: name, keys } => {
                assert_eq!(name, backend.as_str());
                assert_eq!(keys.len(), config_spec(backend).required.len());
            }
            other => panic!("{}: unexpected error {}", backend, other),
        }
    }
}

#[tokio::test]
async fn test_valid_configs_build_unconnected_sources() {
    let registry = default_registry().await.unwrap();
    let dir = tempfile::TempDir::new().unwrap();
    let db_path = dir.path().join("never-created.db");

    let configs = [
        ConnectionConfig::new(BackendKind::Sqlite).with_path(db_path.to_string_lossy()),
        ConnectionConfig::new(BackendKind::MySql)
            .with_host("127.0.0.1")
            .with_user("root")
            .with_password("secret")
            .with_database("app"),
        ConnectionConfig::new(BackendKind::Postgresql),
        ConnectionConfig::new(BackendKind::MongoDb).with_host("127.0.0.1"),
    ];

    for config in configs {
        let backend = config.backend;
        let source = registry.create_source(config).await.unwrap();
        assert_eq!(source.source_type(), backend);
        assert!(!source.is_connected());
        assert!(source.schema().is_none());
        assert!(source.render_schema_as_text().is_err());
    }

    assert!(!db_path.exists());
}

#[test]
fn test_json_configs_validate_with_defaults() {
    let config = ConnectionConfig::from_json(
        r#"{"backend": "mysql", "host": "db", "user": "u", "password": "p", "database": "d"}"#,
    )
    .unwrap();
    let validated = validate_config(&config).unwrap();
    assert_eq!(validated.port(), Some(3306));
    assert_eq!(validated.get("host"), Some("db"));

    let config = ConnectionConfig::from_json(r#"{"backend": "postgres", "port": "6432"}"#).unwrap();
    let validated = validate_config(&config).unwrap();
    assert_eq!(validated.port(), Some(6432));
    assert_eq!(validated.get("user"), Some("postgres"));
    assert_eq!(validated.get("host"), Some("127.0.0.1"));

    let config = ConnectionConfig::from_json(r#"{"backend": "mongo", "host": "h"}"#).unwrap();
    let validated = validate_config(&config).unwrap();
    assert_eq!(validated.port(), Some(27017));
    assert_eq!(validated.get("database"), Some("mydb"));
}

#[test]
fn test_blank_required_value_counts_as_missing() {
    let config = ConnectionConfig::new(BackendKind::MySql)
        .with_host("  ")
        .with_user("root")
        .with_password("secret")
        .with_database("app");

    match validate_config(&config) {
        Err(DataError::MissingConfiguration { keys, .. }) => assert_eq!(keys, vec!["host"]),
        other => panic!("unexpected result: {:?}", other.map(|v| v.backend())),
    }
}

#[test]
fn test_unknown_backend_rejected() {
    assert!(ConnectionConfig::from_json(r#"{"backend": "oracle"}"#).is_err());
}
