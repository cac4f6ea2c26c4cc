//! PostgreSQL driver for polydb-query
//!
//! Implements `DataSource` for PostgreSQL.
//!
//! A unit of work starts with an explicit `BEGIN` before the first command
//! and ends at `commit()` or `rollback()`. The schema snapshot covers the
//! `public` schema only.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use polydb_query::{
    single_statement, split_statements, BackendKind, Capability, ColumnDescriptor, ConfigSpec,
    ConnectionConfig, DataError, DataSource, DataSourceFactory, DriverCell, EntityShape,
    ExecReport, FetchResult, KeyRole, Result, SchemaSnapshot, StatementKind, TransactionOutcome,
};
use std::time::Instant;
use tokio_postgres::{Client, NoTls, Row, SimpleQueryMessage};
use tracing::{debug, error, warn};

/// Configuration keys for the PostgreSQL backend; every key has a default
pub const CONFIG_SPEC: ConfigSpec = ConfigSpec {
    backend: BackendKind::Postgresql,
    required: &[],
    defaults: &[
        ("host", "127.0.0.1"),
        ("port", "5432"),
        ("user", "postgres"),
        ("password", ""),
        ("database", "postgres"),
    ],
};

static DRIVER: DriverCell<PostgresDriver> = DriverCell::new("postgresql");

/// Native driver settings shared by PostgreSQL adapters
#[derive(Debug, Clone)]
pub struct PostgresDriver {
    application_name: String,
    schema: String,
}

impl PostgresDriver {
    /// Process-wide driver, created on first use
    pub fn global() -> &'static PostgresDriver {
        DRIVER.get_or_init(PostgresDriver::default)
    }

    pub fn new(application_name: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            schema: schema.into(),
        }
    }

    /// Schema whose tables appear in the snapshot
    pub fn schema(&self) -> &str {
        &self.schema
    }

    async fn connect(
        &self,
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        database: &str,
    ) -> std::result::Result<Client, tokio_postgres::Error> {
        let mut config = tokio_postgres::Config::new();
        config
            .host(host)
            .port(port)
            .user(user)
            .dbname(database)
            .application_name(&self.application_name);
        if !password.is_empty() {
            config.password(password);
        }

        let (client, connection) = config.connect(NoTls).await?;

        // Spawn connection handler
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {}", e);
            }
        });

        Ok(client)
    }
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new("polydb", "public")
    }
}

/// PostgreSQL data source implementation
pub struct PostgresSource {
    host: String,
    port: u16,
    user: String,
    password: String,
    database: String,
    driver: &'static PostgresDriver,
    client: Option<Client>,
    in_transaction: bool,
    schema: Option<SchemaSnapshot>,
}

impl PostgresSource {
    /// Validate `config` and build an unconnected adapter
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        Self::with_driver(config, PostgresDriver::global())
    }

    pub fn with_driver(
        config: ConnectionConfig,
        driver: &'static PostgresDriver,
    ) -> Result<Self> {
        let validated = CONFIG_SPEC.validate(&config)?;

        Ok(Self {
            host: validated.value("host").to_string(),
            port: validated.port().unwrap_or(5432),
            user: validated.value("user").to_string(),
            password: validated.value("password").to_string(),
            database: validated.value("database").to_string(),
            driver,
            client: None,
            in_transaction: false,
            schema: None,
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    async fn ensure_connected(&mut self) -> Result<()> {
        self.discard_closed_client();
        if self.client.is_none() {
            self.connect().await?;
        }
        Ok(())
    }

    /// Forget a client whose connection task has ended. The server already
    /// aborted any open transaction along with the session.
    fn discard_closed_client(&mut self) {
        if self.client.as_ref().is_some_and(|c| c.is_closed()) {
            warn!(
                "PostgreSQL connection to {} was closed by the server, reconnecting",
                self.database
            );
            self.client = None;
            self.in_transaction = false;
        }
    }

    fn client(&self) -> Result<&Client> {
        self.client.as_ref().ok_or_else(|| {
            DataError::NotConnected(format!(
                "PostgreSQL {}@{}:{}/{}",
                self.user, self.host, self.port, self.database
            ))
        })
    }

    /// Open the unit of work if none is active
    async fn begin_if_needed(&mut self) -> Result<()> {
        if self.in_transaction {
            return Ok(());
        }

        self.client()?
            .batch_execute("BEGIN")
            .await
            .map_err(|e| Self::query_failed("BEGIN", &e))?;
        self.in_transaction = true;
        debug!("Started PostgreSQL transaction");
        Ok(())
    }

    async fn read_catalog(
        client: &Client,
        schema: &str,
    ) -> std::result::Result<SchemaSnapshot, tokio_postgres::Error> {
        let tables = client
            .query(
                r#"
                SELECT table_name::text
                FROM information_schema.tables
                WHERE table_schema = $1 AND table_type = 'BASE TABLE'
                ORDER BY table_name
                "#,
                &[&schema],
            )
            .await?;

        let columns = client
            .query(
                r#"
                SELECT
                    c.table_name::text,
                    c.column_name::text,
                    c.data_type::text,
                    c.is_nullable::text,
                    c.column_default::text,
                    EXISTS (
                        SELECT 1
                        FROM information_schema.table_constraints tc
                        JOIN information_schema.key_column_usage kcu
                            ON tc.constraint_name = kcu.constraint_name
                            AND tc.table_schema = kcu.table_schema
                            AND tc.table_name = kcu.table_name
                        WHERE tc.constraint_type = 'PRIMARY KEY'
                            AND tc.table_schema = c.table_schema
                            AND tc.table_name = c.table_name
                            AND kcu.column_name = c.column_name
                    ) AS is_primary
                FROM information_schema.columns c
                WHERE c.table_schema = $1
                ORDER BY c.table_name, c.ordinal_position
                "#,
                &[&schema],
            )
            .await?;

        let mut by_table: std::collections::BTreeMap<String, Vec<ColumnDescriptor>> = tables
            .iter()
            .map(|row| (row.get::<_, String>(0), Vec::new()))
            .collect();

        for row in &columns {
            let table: String = row.get(0);
            let Some(entry) = by_table.get_mut(&table) else {
                // views also show up in information_schema.columns
                continue;
            };

            let is_nullable: String = row.get(3);
            let is_primary: bool = row.get(5);

            let mut column = ColumnDescriptor::new(row.get::<_, String>(1), row.get::<_, String>(2))
                .with_default(row.get::<_, Option<String>>(4));
            if is_nullable == "NO" {
                column = column.not_null();
            }
            if is_primary {
                column = column.with_key(KeyRole::Primary);
            }
            entry.push(column);
        }

        let mut snapshot = SchemaSnapshot::new();
        for (table, columns) in by_table {
            snapshot.insert(table, EntityShape::Columns(columns));
        }
        Ok(snapshot)
    }

    fn row_to_values(row: &Row) -> Vec<serde_json::Value> {
        (0..row.columns().len())
            .map(|idx| Self::extract_value(row, idx))
            .collect()
    }

    /// Extract value from PostgreSQL row
    fn extract_value(row: &Row, idx: usize) -> serde_json::Value {
        let column = &row.columns()[idx];
        let type_name = column.type_().name();

        match type_name {
            "bool" => row
                .try_get::<_, Option<bool>>(idx)
                .ok()
                .flatten()
                .map(serde_json::Value::Bool)
                .unwrap_or(serde_json::Value::Null),

            "int2" => row
                .try_get::<_, Option<i16>>(idx)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::Number(v.into()))
                .unwrap_or(serde_json::Value::Null),

            "int4" => row
                .try_get::<_, Option<i32>>(idx)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::Number(v.into()))
                .unwrap_or(serde_json::Value::Null),

            "int8" => row
                .try_get::<_, Option<i64>>(idx)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::Number(v.into()))
                .unwrap_or(serde_json::Value::Null),

            "oid" => row
                .try_get::<_, Option<u32>>(idx)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::Number(v.into()))
                .unwrap_or(serde_json::Value::Null),

            "float4" => row
                .try_get::<_, Option<f32>>(idx)
                .ok()
                .flatten()
                .and_then(|v| serde_json::Number::from_f64(v as f64))
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),

            "float8" => row
                .try_get::<_, Option<f64>>(idx)
                .ok()
                .flatten()
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),

            "varchar" | "text" | "char" | "bpchar" | "name" => row
                .try_get::<_, Option<String>>(idx)
                .ok()
                .flatten()
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null),

            "bytea" => row
                .try_get::<_, Option<Vec<u8>>>(idx)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::String(BASE64.encode(v)))
                .unwrap_or(serde_json::Value::Null),

            "date" => row
                .try_get::<_, Option<chrono::NaiveDate>>(idx)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::String(v.to_string()))
                .unwrap_or(serde_json::Value::Null),

            "timestamp" => row
                .try_get::<_, Option<chrono::NaiveDateTime>>(idx)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::String(v.to_string()))
                .unwrap_or(serde_json::Value::Null),

            "timestamptz" => row
                .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::String(v.to_rfc3339()))
                .unwrap_or(serde_json::Value::Null),

            "json" | "jsonb" => row
                .try_get::<_, Option<serde_json::Value>>(idx)
                .ok()
                .flatten()
                .unwrap_or(serde_json::Value::Null),

            "uuid" => row
                .try_get::<_, Option<uuid::Uuid>>(idx)
                .ok()
                .flatten()
                .map(|v| serde_json::Value::String(v.to_string()))
                .unwrap_or(serde_json::Value::Null),

            _ => {
                // Try to get as string for unknown types
                row.try_get::<_, Option<String>>(idx)
                    .ok()
                    .flatten()
                    .map(serde_json::Value::String)
                    .unwrap_or(serde_json::Value::Null)
            }
        }
    }

    /// Build a message from the PostgreSQL error fields
    fn describe_error(e: &tokio_postgres::Error) -> String {
        let Some(db_error) = e.as_db_error() else {
            // Non-database error (connection error, etc.)
            return e.to_string();
        };

        let mut msg = db_error.message().to_string();

        if let Some(detail) = db_error.detail() {
            msg.push_str(&format!("\nDetail: {}", detail));
        }

        if let Some(hint) = db_error.hint() {
            msg.push_str(&format!("\nHint: {}", hint));
        }

        if let Some(position) = db_error.position() {
            msg.push_str(&format!("\nPosition: {:?}", position));
        }

        if let Some(column) = db_error.column() {
            msg.push_str(&format!("\nColumn: {}", column));
        }

        msg
    }

    fn query_failed(sql: &str, e: &tokio_postgres::Error) -> DataError {
        error!("PostgreSQL statement failed: {}", e);
        error!("Failed SQL: {}", sql);
        DataError::QueryFailed(format!("{}\n\nQuery: {}", Self::describe_error(e), sql))
    }
}

#[async_trait]
impl DataSource for PostgresSource {
    fn source_type(&self) -> BackendKind {
        BackendKind::Postgresql
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::Sql,
            Capability::Transactions,
            Capability::TabularSchema,
        ]
    }

    fn is_connected(&self) -> bool {
        self.client.as_ref().is_some_and(|c| !c.is_closed())
    }

    async fn connect(&mut self) -> Result<()> {
        self.discard_closed_client();
        if self.client.is_some() {
            return Ok(());
        }

        debug!(
            "Connecting to PostgreSQL: {}@{}:{}/{}",
            self.user, self.host, self.port, self.database
        );

        let client = self
            .driver
            .connect(
                &self.host,
                self.port,
                &self.user,
                &self.password,
                &self.database,
            )
            .await
            .map_err(|e| {
                DataError::ConnectionFailed(format!(
                    "PostgreSQL connection failed: {}",
                    Self::describe_error(&e)
                ))
            })?;

        self.client = Some(client);
        self.in_transaction = false;

        if let Err(e) = self.refresh_schema().await {
            self.client = None;
            return Err(DataError::ConnectionFailed(format!(
                "PostgreSQL catalog unavailable after connect: {}",
                e
            )));
        }

        debug!(
            "Successfully connected to PostgreSQL database: {}",
            self.database
        );
        Ok(())
    }

    async fn refresh_schema(&mut self) -> Result<()> {
        let snapshot = Self::read_catalog(self.client()?, self.driver.schema())
            .await
            .map_err(|e| {
                DataError::SchemaError(format!(
                    "Failed to read PostgreSQL catalog: {}",
                    Self::describe_error(&e)
                ))
            })?;

        debug!("PostgreSQL catalog has {} tables", snapshot.len());
        self.schema = Some(snapshot);
        Ok(())
    }

    fn schema(&self) -> Option<&SchemaSnapshot> {
        self.schema.as_ref()
    }

    async fn try_execute(&mut self, command: &str) -> Result<ExecReport> {
        self.ensure_connected().await?;

        let statements = split_statements(command);
        if !statements.is_empty() {
            self.begin_if_needed().await?;
        }

        let client = self.client()?;
        let mut report = ExecReport::default();

        for statement in &statements {
            debug!("Executing raw SQL: {}", statement);

            let messages = client
                .simple_query(statement)
                .await
                .map_err(|e| Self::query_failed(statement, &e))?;

            let kind = StatementKind::of(statement);
            for message in messages {
                match message {
                    SimpleQueryMessage::Row(_) => report.rows_discarded += 1,
                    SimpleQueryMessage::CommandComplete(n) if kind == StatementKind::Write => {
                        report.rows_affected += n
                    }
                    _ => {}
                }
            }

            report.statements_executed += 1;
        }

        self.refresh_schema().await?;
        Ok(report)
    }

    async fn try_fetch(&mut self, command: &str) -> Result<FetchResult> {
        self.ensure_connected().await?;

        let sql = single_statement(command)?;
        self.begin_if_needed().await?;
        let start = Instant::now();

        debug!("Fetching from PostgreSQL: {}", sql);

        let client = self.client()?;
        let rows = client
            .query(sql.as_str(), &[])
            .await
            .map_err(|e| Self::query_failed(&sql, &e))?;

        let columns = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => Vec::new(),
        };
        let values = rows.iter().map(Self::row_to_values).map(serde_json::Value::Array).collect();

        let execution_ms = start.elapsed().as_millis() as u64;
        debug!("SQL returned {} rows in {}ms", rows.len(), execution_ms);

        self.refresh_schema().await?;
        Ok(FetchResult::new(columns, values, execution_ms))
    }

    async fn commit(&mut self) -> Result<TransactionOutcome> {
        self.ensure_connected().await?;

        if self.in_transaction {
            self.client()?
                .batch_execute("COMMIT")
                .await
                .map_err(|e| Self::query_failed("COMMIT", &e))?;
            self.in_transaction = false;
            debug!("Committed PostgreSQL transaction");
        }

        Ok(TransactionOutcome::Committed)
    }

    async fn rollback(&mut self) -> Result<TransactionOutcome> {
        self.ensure_connected().await?;

        if self.in_transaction {
            self.client()?
                .batch_execute("ROLLBACK")
                .await
                .map_err(|e| Self::query_failed("ROLLBACK", &e))?;
            self.in_transaction = false;
            debug!("Rolled back PostgreSQL transaction");
        }

        Ok(TransactionOutcome::RolledBack)
    }

    async fn close(&mut self) -> Result<()> {
        // Dropping the client ends the spawned connection task
        if self.client.take().is_some() {
            debug!("Closed PostgreSQL connection to {}", self.database);
        }
        self.in_transaction = false;
        Ok(())
    }
}

/// Builds [`PostgresSource`] adapters for the registry
#[derive(Debug, Default)]
pub struct PostgresFactory;

impl DataSourceFactory for PostgresFactory {
    fn backend_type(&self) -> BackendKind {
        BackendKind::Postgresql
    }

    fn create_source(&self, config: ConnectionConfig) -> Result<Box<dyn DataSource>> {
        Ok(Box::new(PostgresSource::new(config)?))
    }
}
