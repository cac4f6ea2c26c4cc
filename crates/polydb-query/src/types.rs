use crate::error::{DataError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Backends an adapter can be built for
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// File-based relational store
    Sqlite,
    /// Client-server SQL engine
    #[serde(rename = "mysql")]
    MySql,
    /// Client-server SQL engine (alternative dialect)
    #[serde(alias = "postgres")]
    Postgresql,
    /// Schemaless document store
    #[serde(rename = "mongodb", alias = "mongo")]
    MongoDb,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Sqlite,
        BackendKind::MySql,
        BackendKind::Postgresql,
        BackendKind::MongoDb,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Sqlite => "sqlite",
            BackendKind::MySql => "mysql",
            BackendKind::Postgresql => "postgresql",
            BackendKind::MongoDb => "mongodb",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(BackendKind::Sqlite),
            "mysql" => Ok(BackendKind::MySql),
            "postgresql" | "postgres" => Ok(BackendKind::Postgresql),
            "mongodb" | "mongo" => Ok(BackendKind::MongoDb),
            other => Err(DataError::invalid_configuration(format!(
                "Unknown backend: {}",
                other
            ))),
        }
    }
}

/// Capabilities supported by a data source
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum Capability {
    /// Accepts SQL command strings
    Sql,
    /// Accepts structured document commands
    Document,
    /// Native commit/rollback
    Transactions,
    /// Tabular catalog with typed columns
    TabularSchema,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Sql => write!(f, "sql"),
            Capability::Document => write!(f, "document"),
            Capability::Transactions => write!(f, "transactions"),
            Capability::TabularSchema => write!(f, "tabular-schema"),
        }
    }
}

/// Legacy status code returned by the status-only executor
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum ExecStatus {
    /// Every statement ran without a native error
    Success,
    /// A native error occurred; details went to the log
    Failure,
}

impl ExecStatus {
    pub fn code(&self) -> i32 {
        match self {
            ExecStatus::Success => 0,
            ExecStatus::Failure => 1,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecStatus::Success)
    }
}

impl fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// What a successful `try_execute` did
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecReport {
    /// Statements (or document operations) sent to the backend
    pub statements_executed: usize,
    /// Rows changed by data-modifying statements, when the driver reports it
    pub rows_affected: u64,
    /// Rows produced by read statements and discarded
    pub rows_discarded: usize,
    /// Normalized result of a document operation
    pub output: Option<serde_json::Value>,
}

/// Statistics about query execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryStats {
    /// Number of rows returned
    pub row_count: usize,
    /// Query execution time in milliseconds
    pub execution_ms: u64,
}

/// Result of `try_fetch`
///
/// Relational rows are JSON arrays in column order, so a one-column row
/// holding `1` is `[1]`. Document results are JSON objects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchResult {
    /// Column names for relational results, empty for documents
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Value>,
    pub stats: QueryStats,
}

impl FetchResult {
    pub fn new(columns: Vec<String>, rows: Vec<serde_json::Value>, execution_ms: u64) -> Self {
        let row_count = rows.len();

        Self {
            columns,
            rows,
            stats: QueryStats {
                row_count,
                execution_ms,
            },
        }
    }

    pub fn into_rows(self) -> Vec<serde_json::Value> {
        self.rows
    }
}

/// Outcome of commit/rollback
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum TransactionOutcome {
    Committed,
    RolledBack,
    /// The backend has no transactions; nothing happened
    Unsupported { note: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("sqlite".parse::<BackendKind>().unwrap(), BackendKind::Sqlite);
        assert_eq!("Postgres".parse::<BackendKind>().unwrap(), BackendKind::Postgresql);
        assert_eq!("mongo".parse::<BackendKind>().unwrap(), BackendKind::MongoDb);
        assert!("oracle".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_backend_kind_serde_round_names() {
        let kind: BackendKind = serde_json::from_str("\"mysql\"").unwrap();
        assert_eq!(kind, BackendKind::MySql);
        assert_eq!(serde_json::to_string(&BackendKind::MongoDb).unwrap(), "\"mongodb\"");
        assert_eq!(BackendKind::Postgresql.to_string(), "postgresql");
    }

    #[test]
    fn test_exec_status_codes() {
        assert_eq!(ExecStatus::Success.code(), 0);
        assert_eq!(ExecStatus::Failure.code(), 1);
        assert!(!ExecStatus::Failure.is_success());
    }

    #[test]
    fn test_fetch_result_stats() {
        let result = FetchResult::new(
            vec!["id".to_string()],
            vec![serde_json::json!([1]), serde_json::json!([2])],
            3,
        );
        assert_eq!(result.stats.row_count, 2);
        assert_eq!(result.into_rows().len(), 2);
    }
}
