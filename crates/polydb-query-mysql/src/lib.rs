//! MySQL driver for polydb-query
//!
//! Implements `DataSource` for MySQL over a single `sqlx` connection.
//!
//! `autocommit` is switched off right after connecting, so every change
//! stays pending until `commit()`. Statements go through the text protocol
//! (`raw_sql`), which accepts DDL and anything else the server understands.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use polydb_query::{
    single_statement, split_statements, BackendKind, Capability, ColumnDescriptor, ConfigSpec,
    ConnectionConfig, DataError, DataSource, DataSourceFactory, DriverCell, EntityShape,
    ExecReport, FetchResult, KeyRole, Result, SchemaSnapshot, StatementKind, TransactionOutcome,
};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{Column, ConnectOptions, Connection, Executor, Row, TypeInfo, ValueRef};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, error};

/// Configuration keys for the MySQL backend
pub const CONFIG_SPEC: ConfigSpec = ConfigSpec {
    backend: BackendKind::MySql,
    required: &["host", "user", "password", "database"],
    defaults: &[("port", "3306")],
};

static DRIVER: DriverCell<MySqlDriver> = DriverCell::new("mysql");

/// Native driver settings shared by MySQL adapters
#[derive(Debug, Clone)]
pub struct MySqlDriver {
    charset: String,
}

impl MySqlDriver {
    /// Process-wide driver, created on first use
    pub fn global() -> &'static MySqlDriver {
        DRIVER.get_or_init(MySqlDriver::default)
    }

    pub fn with_charset(charset: impl Into<String>) -> Self {
        Self {
            charset: charset.into(),
        }
    }

    fn options(
        &self,
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        database: &str,
    ) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(host)
            .port(port)
            .username(user)
            .password(password)
            .database(database)
            .charset(&self.charset)
    }
}

impl Default for MySqlDriver {
    fn default() -> Self {
        Self::with_charset("utf8mb4")
    }
}

/// MySQL data source implementation
pub struct MySqlSource {
    host: String,
    port: u16,
    user: String,
    password: String,
    database: String,
    driver: &'static MySqlDriver,
    conn: Option<MySqlConnection>,
    pending: bool,
    schema: Option<SchemaSnapshot>,
}

impl MySqlSource {
    /// Validate `config` and build an unconnected adapter
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        Self::with_driver(config, MySqlDriver::global())
    }

    pub fn with_driver(config: ConnectionConfig, driver: &'static MySqlDriver) -> Result<Self> {
        let validated = CONFIG_SPEC.validate(&config)?;

        Ok(Self {
            host: validated.value("host").to_string(),
            port: validated.port().unwrap_or(3306),
            user: validated.value("user").to_string(),
            password: validated.value("password").to_string(),
            database: validated.value("database").to_string(),
            driver,
            conn: None,
            pending: false,
            schema: None,
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    async fn ensure_connected(&mut self) -> Result<()> {
        if self.conn.is_none() {
            self.connect().await?;
        }
        Ok(())
    }

    fn conn_mut(&mut self) -> Result<&mut MySqlConnection> {
        self.conn.as_mut().ok_or_else(|| {
            DataError::NotConnected(format!(
                "MySQL {}@{}:{}/{}",
                self.user, self.host, self.port, self.database
            ))
        })
    }

    async fn read_catalog(conn: &mut MySqlConnection) -> sqlx::Result<SchemaSnapshot> {
        let rows = sqlx::query(
            r#"
            SELECT
                CAST(TABLE_NAME AS CHAR),
                CAST(COLUMN_NAME AS CHAR),
                CAST(COLUMN_TYPE AS CHAR),
                CAST(IS_NULLABLE AS CHAR),
                CAST(COLUMN_KEY AS CHAR),
                CAST(COLUMN_DEFAULT AS CHAR),
                CAST(EXTRA AS CHAR)
            FROM information_schema.columns
            WHERE TABLE_SCHEMA = DATABASE()
            ORDER BY TABLE_NAME, ORDINAL_POSITION
            "#,
        )
        .fetch_all(&mut *conn)
        .await?;

        let mut by_table: BTreeMap<String, Vec<ColumnDescriptor>> = BTreeMap::new();

        for row in &rows {
            let table: String = row.try_get(0)?;
            let is_nullable: String = row.try_get(3)?;
            let key: String = row.try_get(4)?;
            let extra: Option<String> = row.try_get(6)?;

            let mut column = ColumnDescriptor::new(
                row.try_get::<String, _>(1)?,
                row.try_get::<String, _>(2)?,
            )
            .with_key(KeyRole::from_catalog_code(&key))
            .with_default(row.try_get(5)?);
            if is_nullable == "NO" {
                column = column.not_null();
            }
            if let Some(extra) = extra.filter(|e| !e.is_empty()) {
                column = column.with_extra(extra);
            }

            by_table.entry(table).or_default().push(column);
        }

        let mut snapshot = SchemaSnapshot::new();
        for (table, columns) in by_table {
            snapshot.insert(table, EntityShape::Columns(columns));
        }
        Ok(snapshot)
    }

    fn row_to_values(row: &MySqlRow) -> Vec<serde_json::Value> {
        (0..row.columns().len())
            .map(|idx| Self::extract_value(row, idx))
            .collect()
    }

    /// Convert one column of a text-protocol row to JSON
    fn extract_value(row: &MySqlRow, idx: usize) -> serde_json::Value {
        match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return serde_json::Value::Null,
            Err(_) => return serde_json::Value::Null,
            Ok(_) => {}
        }

        let type_name = row.columns()[idx].type_info().name().to_string();

        match type_name.as_str() {
            "BOOLEAN" => row
                .try_get::<bool, _>(idx)
                .map(serde_json::Value::Bool)
                .unwrap_or(serde_json::Value::Null),

            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => row
                .try_get::<i64, _>(idx)
                .map(|v| serde_json::Value::Number(v.into()))
                .unwrap_or(serde_json::Value::Null),

            "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
            | "BIGINT UNSIGNED" => row
                .try_get::<u64, _>(idx)
                .map(|v| serde_json::Value::Number(v.into()))
                .unwrap_or(serde_json::Value::Null),

            "FLOAT" => row
                .try_get::<f32, _>(idx)
                .ok()
                .and_then(|v| serde_json::Number::from_f64(v as f64))
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),

            "DOUBLE" => row
                .try_get::<f64, _>(idx)
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),

            "JSON" => row
                .try_get_unchecked::<String, _>(idx)
                .ok()
                .and_then(|v| serde_json::from_str(&v).ok())
                .unwrap_or(serde_json::Value::Null),

            "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT" => row
                .try_get_unchecked::<Vec<u8>, _>(idx)
                .map(|v| serde_json::Value::String(BASE64.encode(v)))
                .unwrap_or(serde_json::Value::Null),

            // DECIMAL, temporal and character types arrive as text
            _ => row
                .try_get_unchecked::<String, _>(idx)
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null),
        }
    }

    fn describe_error(e: &sqlx::Error) -> String {
        match e.as_database_error() {
            Some(db_error) => match db_error.code() {
                Some(code) => format!("{} (SQLSTATE {})", db_error.message(), code),
                None => db_error.message().to_string(),
            },
            None => e.to_string(),
        }
    }

    fn query_failed(sql: &str, e: &sqlx::Error) -> DataError {
        error!("MySQL statement failed: {}", e);
        DataError::QueryFailed(format!("{}\n\nQuery: {}", Self::describe_error(e), sql))
    }

    async fn end_unit_of_work(&mut self, verb: &str) -> Result<()> {
        if !self.pending {
            return Ok(());
        }

        let conn = self.conn_mut()?;
        (&mut *conn).execute(sqlx::raw_sql(verb))
            .await
            .map_err(|e| Self::query_failed(verb, &e))?;
        self.pending = false;
        debug!("MySQL {} done", verb);
        Ok(())
    }
}

#[async_trait]
impl DataSource for MySqlSource {
    fn source_type(&self) -> BackendKind {
        BackendKind::MySql
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::Sql,
            Capability::Transactions,
            Capability::TabularSchema,
        ]
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn connect(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        debug!(
            "Connecting to MySQL: {}@{}:{}/{}",
            self.user, self.host, self.port, self.database
        );

        let mut conn = self
            .driver
            .options(
                &self.host,
                self.port,
                &self.user,
                &self.password,
                &self.database,
            )
            .connect()
            .await
            .map_err(|e| {
                DataError::ConnectionFailed(format!(
                    "MySQL connection failed: {}",
                    Self::describe_error(&e)
                ))
            })?;

        if let Err(e) = (&mut conn).execute(sqlx::raw_sql("SET autocommit = 0")).await {
            // best effort, the handle is unusable either way
            let _ = conn.close().await;
            return Err(DataError::ConnectionFailed(format!(
                "MySQL session setup failed: {}",
                Self::describe_error(&e)
            )));
        }

        self.conn = Some(conn);
        self.pending = false;

        if let Err(e) = self.refresh_schema().await {
            self.close().await?;
            return Err(DataError::ConnectionFailed(format!(
                "MySQL catalog unavailable after connect: {}",
                e
            )));
        }

        debug!("Successfully connected to MySQL database: {}", self.database);
        Ok(())
    }

    async fn refresh_schema(&mut self) -> Result<()> {
        let snapshot = Self::read_catalog(self.conn_mut()?).await.map_err(|e| {
            DataError::SchemaError(format!(
                "Failed to read MySQL catalog: {}",
                Self::describe_error(&e)
            ))
        })?;

        debug!("MySQL catalog has {} tables", snapshot.len());
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
            self.pending = true;
        }

        let conn = self.conn_mut()?;
        let mut report = ExecReport::default();

        for statement in &statements {
            debug!("Executing MySQL statement: {}", statement);

            if StatementKind::of(statement) == StatementKind::Read {
                let rows = (&mut *conn).fetch_all(sqlx::raw_sql(statement))
                    .await
                    .map_err(|e| Self::query_failed(statement, &e))?;
                debug!("SELECT produced {} rows (not returned)", rows.len());
                report.rows_discarded += rows.len();
            } else {
                let result = (&mut *conn).execute(sqlx::raw_sql(statement))
                    .await
                    .map_err(|e| Self::query_failed(statement, &e))?;
                report.rows_affected += result.rows_affected();
            }

            report.statements_executed += 1;
        }

        self.refresh_schema().await?;
        Ok(report)
    }

    async fn try_fetch(&mut self, command: &str) -> Result<FetchResult> {
        self.ensure_connected().await?;

        let sql = single_statement(command)?;
        self.pending = true;
        let start = Instant::now();

        debug!("Fetching from MySQL: {}", sql);

        let conn = self.conn_mut()?;
        let rows = (&mut *conn).fetch_all(sqlx::raw_sql(&sql))
            .await
            .map_err(|e| Self::query_failed(&sql, &e))?;

        let columns = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => Vec::new(),
        };
        let values = rows
            .iter()
            .map(Self::row_to_values)
            .map(serde_json::Value::Array)
            .collect();

        let execution_ms = start.elapsed().as_millis() as u64;
        debug!("MySQL query returned {} rows in {}ms", rows.len(), execution_ms);

        self.refresh_schema().await?;
        Ok(FetchResult::new(columns, values, execution_ms))
    }

    async fn commit(&mut self) -> Result<TransactionOutcome> {
        self.ensure_connected().await?;
        self.end_unit_of_work("COMMIT").await?;
        Ok(TransactionOutcome::Committed)
    }

    async fn rollback(&mut self) -> Result<TransactionOutcome> {
        self.ensure_connected().await?;
        self.end_unit_of_work("ROLLBACK").await?;
        Ok(TransactionOutcome::RolledBack)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            debug!("Closing MySQL connection to {}", self.database);
            if let Err(e) = conn.close().await {
                error!("MySQL close reported an error: {}", e);
            }
        }
        self.pending = false;
        Ok(())
    }
}

/// Builds [`MySqlSource`] adapters for the registry
#[derive(Debug, Default)]
pub struct MySqlFactory;

impl DataSourceFactory for MySqlFactory {
    fn backend_type(&self) -> BackendKind {
        BackendKind::MySql
    }

    fn create_source(&self, config: ConnectionConfig) -> Result<Box<dyn DataSource>> {
        Ok(Box::new(MySqlSource::new(config)?))
    }
}
