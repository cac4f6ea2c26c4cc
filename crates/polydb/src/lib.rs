//! # polydb
//!
//! One command interface over SQLite, MySQL, PostgreSQL and MongoDB.
//!
//! Relational backends take `;`-separated SQL; MongoDB takes a JSON
//! description of one collection operation. Every adapter validates its
//! configuration up front, connects lazily, keeps a schema snapshot current
//! and exposes the same commit/rollback surface.
//!
//! ```rust,no_run
//! use polydb::{default_registry, BackendKind, ConnectionConfig, DataSource};
//!
//! # async fn example() -> polydb::Result<()> {
//! let registry = default_registry().await?;
//!
//! let config = ConnectionConfig::from_json(r#"{"backend": "sqlite", "path": "app.db"}"#)?;
//! let mut source = registry.create_source(config).await?;
//!
//! source.execute("CREATE TABLE t (id INTEGER PRIMARY KEY); INSERT INTO t VALUES (1);").await?;
//! source.commit().await?;
//! assert_eq!(source.fetch("SELECT * FROM t").await?.len(), 1);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use tracing::debug;

pub use polydb_query::*;

pub use polydb_query_mongodb as mongodb;
pub use polydb_query_mysql as mysql;
pub use polydb_query_postgres as postgres;
pub use polydb_query_sqlite as sqlite;

pub use polydb_query_mongodb::{MongoDbFactory, MongoDbSource};
pub use polydb_query_mysql::{MySqlFactory, MySqlSource};
pub use polydb_query_postgres::{PostgresFactory, PostgresSource};
pub use polydb_query_sqlite::{SqliteFactory, SqliteSource};

/// Required keys and defaults for `backend`
pub fn config_spec(backend: BackendKind) -> &'static ConfigSpec {
    match backend {
        BackendKind::Sqlite => &polydb_query_sqlite::CONFIG_SPEC,
        BackendKind::MySql => &polydb_query_mysql::CONFIG_SPEC,
        BackendKind::Postgresql => &polydb_query_postgres::CONFIG_SPEC,
        BackendKind::MongoDb => &polydb_query_mongodb::CONFIG_SPEC,
    }
}

/// Check a configuration against its backend's rules without building an adapter
pub fn validate_config(config: &ConnectionConfig) -> Result<ValidatedConfig> {
    config_spec(config.backend).validate(config)
}

/// Registry with a factory for every supported backend
pub async fn default_registry() -> Result<QueryRegistry> {
    let registry = QueryRegistry::new();

    registry.register_factory(Arc::new(SqliteFactory)).await?;
    registry.register_factory(Arc::new(MySqlFactory)).await?;
    registry.register_factory(Arc::new(PostgresFactory)).await?;
    registry.register_factory(Arc::new(MongoDbFactory)).await?;

    debug!("Registered {} backends", BackendKind::ALL.len());
    Ok(registry)
}
