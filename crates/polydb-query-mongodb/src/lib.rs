//! MongoDB implementation of the polydb-query DataSource trait
//!
//! Commands are JSON objects describing one collection operation:
//!
//! ```rust,no_run
//! use polydb_query::{BackendKind, ConnectionConfig, DataSource};
//! use polydb_query_mongodb::MongoDbSource;
//!
//! # async fn example() -> polydb_query::Result<()> {
//! let config = ConnectionConfig::new(BackendKind::MongoDb).with_host("127.0.0.1");
//! let mut source = MongoDbSource::new(config)?;
//!
//! source
//!     .execute(r#"{"operation": "insert_one", "collection": "people", "data": {"x": 1}}"#)
//!     .await?;
//! let docs = source
//!     .fetch(r#"{"operation": "find_one", "collection": "people", "query": {"x": 1}}"#)
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! MongoDB has no multi-statement transactions here; `commit()` and
//! `rollback()` report [`TransactionOutcome::Unsupported`] and touch nothing.

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::TryStreamExt;
use mongodb::{
    options::{ClientOptions, Credential},
    results::{DeleteResult, UpdateResult},
    Client, Database,
};
use polydb_query::{
    BackendKind, Capability, ConfigSpec, ConnectionConfig, DataError, DataSource,
    DataSourceFactory, DocumentCommand, DocumentOperation, DriverCell, EntityShape, ExecReport,
    FetchResult, JsonDocument, Result, SchemaSnapshot, TransactionOutcome,
};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Configuration keys for the MongoDB backend
pub const CONFIG_SPEC: ConfigSpec = ConfigSpec {
    backend: BackendKind::MongoDb,
    required: &["host"],
    defaults: &[("port", "27017"), ("password", ""), ("database", "mydb")],
};

const NO_TRANSACTIONS: &str =
    "MongoDB applies each operation immediately; there is no transaction to end";

static DRIVER: DriverCell<MongoDriver> = DriverCell::new("mongodb");

/// Native driver settings shared by MongoDB adapters
#[derive(Debug, Clone)]
pub struct MongoDriver {
    app_name: String,
    server_selection_timeout: Duration,
}

impl MongoDriver {
    /// Process-wide driver, created on first use
    pub fn global() -> &'static MongoDriver {
        DRIVER.get_or_init(MongoDriver::default)
    }

    pub fn new(app_name: impl Into<String>, server_selection_timeout: Duration) -> Self {
        Self {
            app_name: app_name.into(),
            server_selection_timeout,
        }
    }

    async fn client(
        &self,
        host: &str,
        port: u16,
        user: Option<&str>,
        password: &str,
    ) -> std::result::Result<Client, mongodb::error::Error> {
        let mut options = ClientOptions::parse(format!("mongodb://{}:{}", host, port)).await?;
        options.app_name = Some(self.app_name.clone());
        options.server_selection_timeout = Some(self.server_selection_timeout);

        if let Some(user) = user {
            options.credential = Some(
                Credential::builder()
                    .username(user.to_string())
                    .password(password.to_string())
                    .build(),
            );
        }

        Client::with_options(options)
    }
}

impl Default for MongoDriver {
    fn default() -> Self {
        Self::new("polydb", Duration::from_secs(10))
    }
}

/// MongoDB data source implementation
pub struct MongoDbSource {
    host: String,
    port: u16,
    user: Option<String>,
    password: String,
    database: String,
    driver: &'static MongoDriver,
    client: Option<Client>,
    schema: Option<SchemaSnapshot>,
}

impl MongoDbSource {
    /// Validate `config` and build an unconnected adapter
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        Self::with_driver(config, MongoDriver::global())
    }

    pub fn with_driver(config: ConnectionConfig, driver: &'static MongoDriver) -> Result<Self> {
        let validated = CONFIG_SPEC.validate(&config)?;

        Ok(Self {
            host: validated.value("host").to_string(),
            port: validated.port().unwrap_or(27017),
            user: validated
                .get("user")
                .filter(|u| !u.is_empty())
                .map(str::to_string),
            password: validated.value("password").to_string(),
            database: validated.value("database").to_string(),
            driver,
            client: None,
            schema: None,
        })
    }

    pub fn database_name(&self) -> &str {
        &self.database
    }

    async fn ensure_connected(&mut self) -> Result<()> {
        if self.client.is_none() {
            self.connect().await?;
        }
        Ok(())
    }

    fn database(&self) -> Result<Database> {
        self.client
            .as_ref()
            .map(|client| client.database(&self.database))
            .ok_or_else(|| {
                DataError::NotConnected(format!(
                    "MongoDB {}:{}/{}",
                    self.host, self.port, self.database
                ))
            })
    }

    /// Run one decoded command and normalize its result
    async fn dispatch(&self, command: DocumentCommand) -> Result<serde_json::Value> {
        let db = self.database()?;
        let operation = command.operation();
        let failed = |e: mongodb::error::Error| Self::native_failure(operation, e);

        debug!(
            "Dispatching MongoDB {} on {}",
            operation,
            command.collection().unwrap_or(&self.database)
        );

        let value = match command {
            DocumentCommand::Aggregate {
                collection,
                pipeline,
                options,
            } => {
                let pipeline = pipeline
                    .into_iter()
                    .map(to_document)
                    .collect::<Result<Vec<_>>>()?;

                let mut native = mongodb::options::AggregateOptions::default();
                native.allow_disk_use = options.allow_disk_use;
                native.batch_size = options.batch_size;

                let cursor = db
                    .collection::<Document>(&collection)
                    .aggregate(pipeline)
                    .with_options(native)
                    .await
                    .map_err(failed)?;
                let docs: Vec<Document> = cursor.try_collect().await.map_err(failed)?;
                documents_to_json(docs)
            }

            DocumentCommand::InsertOne {
                collection,
                document,
            } => {
                let result = db
                    .collection::<Document>(&collection)
                    .insert_one(to_document(document)?)
                    .await
                    .map_err(failed)?;
                serde_json::json!({ "inserted_id": result.inserted_id.into_relaxed_extjson() })
            }

            DocumentCommand::InsertMany {
                collection,
                documents,
            } => {
                let documents = documents
                    .into_iter()
                    .map(to_document)
                    .collect::<Result<Vec<_>>>()?;
                let result = db
                    .collection::<Document>(&collection)
                    .insert_many(documents)
                    .await
                    .map_err(failed)?;
                insert_many_json(result.inserted_ids)
            }

            DocumentCommand::Find {
                collection,
                filter,
                options,
            } => {
                let mut native = mongodb::options::FindOptions::default();
                native.sort = options.sort.map(to_document).transpose()?;
                native.projection = options.projection.map(to_document).transpose()?;
                native.limit = options.limit;
                native.skip = options.skip;

                let cursor = db
                    .collection::<Document>(&collection)
                    .find(to_document(filter)?)
                    .with_options(native)
                    .await
                    .map_err(failed)?;
                let docs: Vec<Document> = cursor.try_collect().await.map_err(failed)?;
                documents_to_json(docs)
            }

            DocumentCommand::FindOne {
                collection,
                filter,
                options,
            } => {
                if options.limit.is_some() {
                    warn!("find_one ignores the 'limit' option");
                }

                let mut native = mongodb::options::FindOneOptions::default();
                native.sort = options.sort.map(to_document).transpose()?;
                native.projection = options.projection.map(to_document).transpose()?;
                native.skip = options.skip;

                db.collection::<Document>(&collection)
                    .find_one(to_document(filter)?)
                    .with_options(native)
                    .await
                    .map_err(failed)?
                    .map(|doc| Bson::Document(doc).into_relaxed_extjson())
                    .unwrap_or(serde_json::Value::Null)
            }

            DocumentCommand::UpdateOne {
                collection,
                filter,
                update,
                options,
            } => {
                let mut native = mongodb::options::UpdateOptions::default();
                native.upsert = options.upsert;

                let result = db
                    .collection::<Document>(&collection)
                    .update_one(to_document(filter)?, to_document(update)?)
                    .with_options(native)
                    .await
                    .map_err(failed)?;
                update_json(result)
            }

            DocumentCommand::UpdateMany {
                collection,
                filter,
                update,
                options,
            } => {
                let mut native = mongodb::options::UpdateOptions::default();
                native.upsert = options.upsert;

                let result = db
                    .collection::<Document>(&collection)
                    .update_many(to_document(filter)?, to_document(update)?)
                    .with_options(native)
                    .await
                    .map_err(failed)?;
                update_json(result)
            }

            DocumentCommand::DeleteOne { collection, filter } => {
                let result = db
                    .collection::<Document>(&collection)
                    .delete_one(to_document(filter)?)
                    .await
                    .map_err(failed)?;
                delete_json(result)
            }

            DocumentCommand::DeleteMany { collection, filter } => {
                let result = db
                    .collection::<Document>(&collection)
                    .delete_many(to_document(filter)?)
                    .await
                    .map_err(failed)?;
                delete_json(result)
            }

            DocumentCommand::Command { command } => {
                let reply = db
                    .run_command(to_document(command)?)
                    .await
                    .map_err(failed)?;
                Bson::Document(reply).into_relaxed_extjson()
            }
        };

        Ok(value)
    }

    /// Decode, dispatch, then refresh the snapshot whatever the native outcome
    async fn run(&mut self, command: &str) -> Result<serde_json::Value> {
        let command = DocumentCommand::parse(command)?;
        self.ensure_connected().await?;

        let outcome = self.dispatch(command).await;

        if let Err(e) = self.refresh_schema().await {
            error!("MongoDB schema refresh failed: {}", e);
        }

        outcome
    }

    fn native_failure(operation: DocumentOperation, e: mongodb::error::Error) -> DataError {
        error!("MongoDB {} failed: {}", operation, e);
        DataError::QueryFailed(format!("MongoDB {} failed: {}", operation, e))
    }
}

/// Convert a JSON object (extended JSON accepted) into a BSON document
fn to_document(map: JsonDocument) -> Result<Document> {
    match Bson::try_from(serde_json::Value::Object(map)) {
        Ok(Bson::Document(doc)) => Ok(doc),
        Ok(other) => Err(DataError::SerializationError(format!(
            "expected a document, extended JSON produced {:?}",
            other.element_type()
        ))),
        Err(e) => Err(DataError::SerializationError(format!(
            "invalid extended JSON: {}",
            e
        ))),
    }
}

fn documents_to_json(docs: Vec<Document>) -> serde_json::Value {
    serde_json::Value::Array(
        docs.into_iter()
            .map(|doc| Bson::Document(doc).into_relaxed_extjson())
            .collect(),
    )
}

fn insert_many_json(inserted_ids: HashMap<usize, Bson>) -> serde_json::Value {
    let mut ids: Vec<(usize, Bson)> = inserted_ids.into_iter().collect();
    ids.sort_by_key(|(idx, _)| *idx);

    let ids: Vec<serde_json::Value> = ids
        .into_iter()
        .map(|(_, id)| id.into_relaxed_extjson())
        .collect();
    serde_json::json!({ "inserted_ids": ids })
}

fn update_json(result: UpdateResult) -> serde_json::Value {
    let mut value = serde_json::json!({
        "matched_count": result.matched_count,
        "modified_count": result.modified_count,
    });
    if let Some(id) = result.upserted_id {
        value["upserted_id"] = id.into_relaxed_extjson();
    }
    value
}

fn delete_json(result: DeleteResult) -> serde_json::Value {
    serde_json::json!({ "deleted_count": result.deleted_count })
}

/// Rows for the fetch path: lists are spread, a missing document is no rows
fn output_to_rows(output: serde_json::Value) -> Vec<serde_json::Value> {
    match output {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Null => Vec::new(),
        other => vec![other],
    }
}

#[async_trait]
impl DataSource for MongoDbSource {
    fn source_type(&self) -> BackendKind {
        BackendKind::MongoDb
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::Document]
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    async fn connect(&mut self) -> Result<()> {
        if self.client.is_some() {
            return Ok(());
        }

        debug!(
            "Connecting to MongoDB at {}:{}/{}",
            self.host, self.port, self.database
        );

        let client = self
            .driver
            .client(&self.host, self.port, self.user.as_deref(), &self.password)
            .await
            .map_err(|e| {
                error!("Failed to create MongoDB client: {}", e);
                DataError::ConnectionFailed(format!("Failed to create MongoDB client: {}", e))
            })?;

        // Test connection
        if let Err(e) = client
            .database(&self.database)
            .run_command(doc! { "ping": 1 })
            .await
        {
            error!("Failed to connect to MongoDB: {}", e);
            client.shutdown().await;
            return Err(DataError::ConnectionFailed(format!(
                "Failed to connect to MongoDB: {}",
                e
            )));
        }

        self.client = Some(client);

        if let Err(e) = self.refresh_schema().await {
            self.close().await?;
            return Err(DataError::ConnectionFailed(format!(
                "MongoDB catalog unavailable after connect: {}",
                e
            )));
        }

        debug!("MongoDB client connected to database {}", self.database);
        Ok(())
    }

    async fn refresh_schema(&mut self) -> Result<()> {
        let db = self.database()?;

        let names = db
            .list_collection_names()
            .filter(doc! { "name": { "$regex": "^(?!system\\.)" } })
            .await
            .map_err(|e| {
                DataError::SchemaError(format!("Failed to list collections: {}", e))
            })?;

        let mut snapshot = SchemaSnapshot::new();
        for name in names {
            let sample = db
                .collection::<Document>(&name)
                .find_one(doc! {})
                .await
                .map_err(|e| {
                    DataError::SchemaError(format!("Failed to sample collection {}: {}", name, e))
                })?;

            snapshot.insert(
                name,
                EntityShape::Sample(sample.map(|d| Bson::Document(d).into_relaxed_extjson())),
            );
        }

        debug!(
            "Found {} collections in database {}",
            snapshot.len(),
            self.database
        );
        self.schema = Some(snapshot);
        Ok(())
    }

    fn schema(&self) -> Option<&SchemaSnapshot> {
        self.schema.as_ref()
    }

    async fn try_execute(&mut self, command: &str) -> Result<ExecReport> {
        let output = self.run(command).await?;

        Ok(ExecReport {
            statements_executed: 1,
            output: Some(output),
            ..ExecReport::default()
        })
    }

    async fn try_fetch(&mut self, command: &str) -> Result<FetchResult> {
        let start = Instant::now();
        let rows = output_to_rows(self.run(command).await?);
        let execution_ms = start.elapsed().as_millis() as u64;

        debug!("MongoDB returned {} documents in {}ms", rows.len(), execution_ms);
        Ok(FetchResult::new(Vec::new(), rows, execution_ms))
    }

    async fn commit(&mut self) -> Result<TransactionOutcome> {
        info!("commit requested: {}", NO_TRANSACTIONS);
        Ok(TransactionOutcome::Unsupported {
            note: NO_TRANSACTIONS.to_string(),
        })
    }

    async fn rollback(&mut self) -> Result<TransactionOutcome> {
        info!("rollback requested: {}", NO_TRANSACTIONS);
        Ok(TransactionOutcome::Unsupported {
            note: NO_TRANSACTIONS.to_string(),
        })
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(client) = self.client.take() {
            debug!("Closing MongoDB source");
            client.shutdown().await;
        }
        Ok(())
    }
}

/// Builds [`MongoDbSource`] adapters for the registry
#[derive(Debug, Default)]
pub struct MongoDbFactory;

impl DataSourceFactory for MongoDbFactory {
    fn backend_type(&self) -> BackendKind {
        BackendKind::MongoDb
    }

    fn create_source(&self, config: ConnectionConfig) -> Result<Box<dyn DataSource>> {
        Ok(Box::new(MongoDbSource::new(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polydb_query::ExecStatus;
    use serde_json::json;

    fn object(value: serde_json::Value) -> JsonDocument {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_defaults_applied() {
        let config = ConnectionConfig::new(BackendKind::MongoDb).with_host("127.0.0.1");
        let source = MongoDbSource::new(config).unwrap();
        assert_eq!(source.port, 27017);
        assert_eq!(source.database_name(), "mydb");
        assert_eq!(source.password, "");
        assert!(source.user.is_none());
        assert!(!source.is_connected());
    }

    #[test]
    fn test_host_required() {
        let config = ConnectionConfig::new(BackendKind::MongoDb).with_database("app");
        assert!(matches!(
            MongoDbSource::new(config),
            Err(DataError::MissingConfiguration { .. })
        ));
    }

    #[test]
    fn test_to_document_reads_extended_json() {
        let doc = to_document(object(json!({
            "x": 1,
            "big": 5_000_000_000_i64,
            "_id": {"$oid": "507f1f77bcf86cd799439011"},
            "nested": {"tags": ["a", "b"]}
        })))
        .unwrap();

        assert_eq!(doc.get_i32("x").unwrap(), 1);
        assert_eq!(doc.get_i64("big").unwrap(), 5_000_000_000);
        assert!(doc.get_object_id("_id").is_ok());
        assert_eq!(
            doc.get_document("nested").unwrap().get_array("tags").unwrap().len(),
            2
        );
    }

    #[test]
    fn test_to_document_rejects_bare_extended_value() {
        let err = to_document(object(json!({"$oid": "507f1f77bcf86cd799439011"}))).unwrap_err();
        assert!(matches!(err, DataError::SerializationError(_)));
    }

    #[test]
    fn test_insert_many_ids_keep_input_order() {
        let ids = HashMap::from([
            (1, Bson::Int32(20)),
            (0, Bson::Int32(10)),
            (2, Bson::Int32(30)),
        ]);

        assert_eq!(insert_many_json(ids), json!({"inserted_ids": [10, 20, 30]}));
    }

    #[test]
    fn test_output_to_rows() {
        assert_eq!(output_to_rows(json!([{"a": 1}, {"a": 2}])).len(), 2);
        assert!(output_to_rows(serde_json::Value::Null).is_empty());
        assert_eq!(
            output_to_rows(json!({"deleted_count": 3})),
            vec![json!({"deleted_count": 3})]
        );
    }

    #[tokio::test]
    async fn test_transactions_are_noops_without_server() {
        let config = ConnectionConfig::new(BackendKind::MongoDb).with_host("127.0.0.1");
        let mut source = MongoDbSource::new(config).unwrap();

        assert!(matches!(
            source.commit().await.unwrap(),
            TransactionOutcome::Unsupported { .. }
        ));
        assert!(matches!(
            source.rollback().await.unwrap(),
            TransactionOutcome::Unsupported { .. }
        ));
        assert!(!source.is_connected());
        assert!(!source.supports_transactions());
    }

    #[tokio::test]
    async fn test_malformed_command_fails_before_connecting() {
        let config = ConnectionConfig::new(BackendKind::MongoDb).with_host("127.0.0.1");
        let mut source = MongoDbSource::new(config).unwrap();

        let status = source
            .execute(r#"{"operation": "drop_everything", "collection": "c"}"#)
            .await
            .unwrap();
        assert_eq!(status, ExecStatus::Failure);

        assert!(matches!(
            source.try_execute("not json").await,
            Err(DataError::InvalidQuery(_))
        ));
        assert!(source.fetch(r#"{"operation": "insert_many", "collection": "c", "data": {}}"#)
            .await
            .unwrap()
            .is_empty());
        assert!(!source.is_connected());
        assert!(source.schema().is_none());
    }
}
