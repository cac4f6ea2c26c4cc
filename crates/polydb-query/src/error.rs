use std::fmt;
use thiserror::Error;

/// Unified error type for all data source operations
#[derive(Error, Debug)]
pub enum DataError {
    /// Connection failed (authentication, network, missing file, etc.)
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// An operation needed a live handle or a schema snapshot that does not exist yet
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// Native error while executing a command
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Malformed command payload
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Catalog/introspection error
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// Operation not supported by this backend
    #[error("Operation not supported: {0}")]
    OperationNotSupported(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Required configuration keys are absent or empty
    #[error("Invalid configuration for {backend}: missing or empty keys: {}", .keys.join(", "))]
    MissingConfiguration {
        backend: &'static str,
        keys: Vec<String>,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Coarse classification of a [`DataError`], used by callers that only need to
/// know which stage of the pipeline failed.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ErrorKind {
    Configuration,
    Connection,
    Execution,
    UnsupportedOperation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "configuration"),
            ErrorKind::Connection => write!(f, "connection"),
            ErrorKind::Execution => write!(f, "execution"),
            ErrorKind::UnsupportedOperation => write!(f, "unsupported-operation"),
        }
    }
}

impl DataError {
    /// Create an operation not supported error
    pub fn operation_not_supported(msg: impl Into<String>) -> Self {
        DataError::OperationNotSupported(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        DataError::InvalidConfiguration(msg.into())
    }

    /// Create an invalid query error
    pub fn invalid_query(msg: impl Into<String>) -> Self {
        DataError::InvalidQuery(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DataError::InvalidConfiguration(_) | DataError::MissingConfiguration { .. } => {
                ErrorKind::Configuration
            }
            DataError::ConnectionFailed(_) | DataError::NotConnected(_) => ErrorKind::Connection,
            DataError::OperationNotSupported(_) => ErrorKind::UnsupportedOperation,
            DataError::QueryFailed(_)
            | DataError::InvalidQuery(_)
            | DataError::SchemaError(_)
            | DataError::SerializationError(_) => ErrorKind::Execution,
        }
    }

    /// Whether the legacy status/empty-result methods must still surface this
    /// error instead of collapsing it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Configuration | ErrorKind::Connection
        )
    }
}

impl From<serde_json::Error> for DataError {
    fn from(e: serde_json::Error) -> Self {
        DataError::SerializationError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_configuration_message() {
        let err = DataError::MissingConfiguration {
            backend: "mysql",
            keys: vec!["user".to_string(), "password".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Invalid configuration for mysql: missing or empty keys: user, password"
        );
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            DataError::ConnectionFailed("refused".into()).kind(),
            ErrorKind::Connection
        );
        assert_eq!(
            DataError::QueryFailed("syntax".into()).kind(),
            ErrorKind::Execution
        );
        assert_eq!(
            DataError::operation_not_supported("drop_all").kind(),
            ErrorKind::UnsupportedOperation
        );
    }

    #[test]
    fn test_fatal_errors() {
        assert!(DataError::invalid_configuration("bad").is_fatal());
        assert!(DataError::ConnectionFailed("down".into()).is_fatal());
        assert!(!DataError::QueryFailed("no such table".into()).is_fatal());
        assert!(!DataError::operation_not_supported("x").is_fatal());
    }
}
