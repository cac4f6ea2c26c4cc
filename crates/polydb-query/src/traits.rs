use crate::error::{DataError, Result};
use crate::schema::SchemaSnapshot;
use crate::types::*;
use async_trait::async_trait;
use downcast_rs::{impl_downcast, Downcast};
use tracing::warn;

/// Core trait that all backend adapters implement
///
/// An adapter owns a single native handle. Operations that need the handle
/// open it on demand, so `connect()` is optional and `close()` is never final.
///
/// Two result channels exist side by side:
/// - `try_execute` / `try_fetch` return the full [`DataError`].
/// - `execute` / `fetch` keep the legacy contract: execution errors become
///   [`ExecStatus::Failure`] or an empty row list, and only configuration
///   and connection errors reach the caller. An empty list therefore means
///   either "no rows" or "the query failed"; check the log or use
///   `try_fetch` to tell them apart.
#[async_trait]
pub trait DataSource: Send + Downcast {
    /// Get the backend this adapter talks to
    fn source_type(&self) -> BackendKind;

    /// Get all capabilities supported by this source
    fn capabilities(&self) -> Vec<Capability>;

    /// Check if a specific capability is supported
    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Whether commit/rollback reach a native transaction
    fn supports_transactions(&self) -> bool {
        self.supports(Capability::Transactions)
    }

    fn is_connected(&self) -> bool;

    /// Open the native handle and take the first schema snapshot.
    /// No-op when already connected.
    async fn connect(&mut self) -> Result<()>;

    /// Re-read the backend catalog and replace the cached snapshot
    async fn refresh_schema(&mut self) -> Result<()>;

    /// Snapshot from the last refresh; `None` before the first connect
    fn schema(&self) -> Option<&SchemaSnapshot>;

    /// Describe the current snapshot as text
    fn render_schema_as_text(&self) -> Result<String> {
        self.schema()
            .map(SchemaSnapshot::render_text)
            .ok_or_else(|| {
                DataError::NotConnected(format!(
                    "no schema snapshot for {}; connect first",
                    self.source_type()
                ))
            })
    }

    /// Run a command, keeping the native error on failure
    async fn try_execute(&mut self, command: &str) -> Result<ExecReport>;

    /// Run a command and return its rows or documents, keeping the native
    /// error on failure
    async fn try_fetch(&mut self, command: &str) -> Result<FetchResult>;

    /// Run a command and report only success or failure
    async fn execute(&mut self, command: &str) -> Result<ExecStatus> {
        match self.try_execute(command).await {
            Ok(_) => Ok(ExecStatus::Success),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!("{} command failed ({}): {}", self.source_type(), e.kind(), e);
                Ok(ExecStatus::Failure)
            }
        }
    }

    /// Run a command and return its rows, or an empty list if it failed
    async fn fetch(&mut self, command: &str) -> Result<Vec<serde_json::Value>> {
        match self.try_fetch(command).await {
            Ok(result) => Ok(result.into_rows()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!("{} fetch failed ({}): {}", self.source_type(), e.kind(), e);
                Ok(Vec::new())
            }
        }
    }

    async fn commit(&mut self) -> Result<TransactionOutcome>;

    async fn rollback(&mut self) -> Result<TransactionOutcome>;

    /// Release the native handle. Idempotent.
    async fn close(&mut self) -> Result<()>;
}

impl_downcast!(DataSource);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EntityShape;

    /// In-memory source whose commands fail when they contain "fail"
    struct ScriptedSource {
        connected: bool,
        schema: Option<SchemaSnapshot>,
        refusing: bool,
    }

    impl ScriptedSource {
        fn new() -> Self {
            Self {
                connected: false,
                schema: None,
                refusing: false,
            }
        }
    }

    #[async_trait]
    impl DataSource for ScriptedSource {
        fn source_type(&self) -> BackendKind {
            BackendKind::Sqlite
        }

        fn capabilities(&self) -> Vec<Capability> {
            vec![Capability::Sql]
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        async fn connect(&mut self) -> Result<()> {
            if self.refusing {
                return Err(DataError::ConnectionFailed("refused".to_string()));
            }
            self.connected = true;
            self.refresh_schema().await
        }

        async fn refresh_schema(&mut self) -> Result<()> {
            let mut snapshot = SchemaSnapshot::new();
            snapshot.insert("t", EntityShape::Columns(Vec::new()));
            self.schema = Some(snapshot);
            Ok(())
        }

        fn schema(&self) -> Option<&SchemaSnapshot> {
            self.schema.as_ref()
        }

        async fn try_execute(&mut self, command: &str) -> Result<ExecReport> {
            self.connect().await?;
            if command.contains("fail") {
                return Err(DataError::QueryFailed("scripted failure".to_string()));
            }
            Ok(ExecReport::default())
        }

        async fn try_fetch(&mut self, command: &str) -> Result<FetchResult> {
            self.connect().await?;
            if command.contains("fail") {
                return Err(DataError::QueryFailed("scripted failure".to_string()));
            }
            Ok(FetchResult::new(
                vec!["id".to_string()],
                vec![serde_json::json!([1])],
                0,
            ))
        }

        async fn commit(&mut self) -> Result<TransactionOutcome> {
            Ok(TransactionOutcome::Committed)
        }

        async fn rollback(&mut self) -> Result<TransactionOutcome> {
            Ok(TransactionOutcome::RolledBack)
        }

        async fn close(&mut self) -> Result<()> {
            self.connected = false;
            Ok(())
        }
    }

    #[test]
    fn test_capability_display() {
        assert_eq!(Capability::Sql.to_string(), "sql");
        assert_eq!(Capability::Document.to_string(), "document");
        assert_eq!(Capability::Transactions.to_string(), "transactions");
    }

    #[tokio::test]
    async fn test_legacy_execute_collapses_execution_errors() {
        let mut source = ScriptedSource::new();
        assert_eq!(source.execute("ok").await.unwrap(), ExecStatus::Success);
        assert_eq!(source.execute("fail").await.unwrap(), ExecStatus::Failure);
        assert!(source.fetch("fail").await.unwrap().is_empty());
        assert_eq!(source.fetch("ok").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_legacy_execute_propagates_connection_errors() {
        let mut source = ScriptedSource::new();
        source.refusing = true;
        assert!(matches!(
            source.execute("ok").await,
            Err(DataError::ConnectionFailed(_))
        ));
        assert!(source.fetch("ok").await.is_err());
    }

    #[tokio::test]
    async fn test_render_requires_snapshot() {
        let mut source = ScriptedSource::new();
        assert!(matches!(
            source.render_schema_as_text(),
            Err(DataError::NotConnected(_))
        ));

        source.connect().await.unwrap();
        assert_eq!(source.render_schema_as_text().unwrap(), "Table 't':\n\n");
        assert!(!source.supports_transactions());
    }

    #[tokio::test]
    async fn test_downcast_boxed_source() {
        let source: Box<dyn DataSource> = Box::new(ScriptedSource::new());
        assert!(source.downcast_ref::<ScriptedSource>().is_some());
    }
}
