//! # polydb-query
//!
//! Core abstractions for issuing commands against heterogeneous databases.
//!
//! Backends are implemented in their own crates:
//! - `polydb-query-sqlite` - file-based relational store
//! - `polydb-query-mysql` - MySQL
//! - `polydb-query-postgres` - PostgreSQL
//! - `polydb-query-mongodb` - MongoDB (document store)
//!
//! ## Architecture
//!
//! - **DataSource**: the contract every adapter implements (connect, execute,
//!   fetch, commit, rollback, close, schema introspection), with capability
//!   flags for the parts backends do not share
//! - **ConfigSpec**: per-backend required keys and defaults, checked before
//!   any connection attempt
//! - **SchemaSnapshot**: the cached catalog, refreshed after every call
//! - **DocumentCommand**: the closed set of document operations, decoded once
//!   from JSON
//! - **QueryRegistry**: backend identifier to factory mapping
//!
//! ## Example
//!
//! ```rust,no_run
//! use polydb_query::{BackendKind, ConnectionConfig, DataSource, QueryRegistry};
//!
//! # async fn example() -> polydb_query::Result<()> {
//! let registry = QueryRegistry::new();
//! // registry.register_factory(...).await?;
//!
//! let config = ConnectionConfig::new(BackendKind::Sqlite).with_path("app.db");
//! let mut source = registry.open(config).await?;
//!
//! source.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)").await?;
//! println!("{}", source.render_schema_as_text()?);
//! source.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod config;
pub mod driver;
pub mod error;
pub mod registry;
pub mod schema;
pub mod statement;
pub mod traits;
pub mod types;

// Re-export commonly used items
pub use command::{
    AggregateOptions, DocumentCommand, DocumentOperation, FindOptions, JsonDocument,
    UpdateOptions,
};
pub use config::{ConfigSpec, ConnectionConfig, ValidatedConfig};
pub use driver::DriverCell;
pub use error::{DataError, ErrorKind, Result};
pub use registry::{DataSourceFactory, QueryRegistry};
pub use schema::{ColumnDescriptor, EntityShape, KeyRole, SchemaSnapshot};
pub use statement::{single_statement, skip_leading_comments, split_statements, StatementKind};
pub use traits::DataSource;
pub use types::{
    BackendKind, Capability, ExecReport, ExecStatus, FetchResult, QueryStats, TransactionOutcome,
};
