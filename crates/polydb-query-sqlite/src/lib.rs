//! SQLite driver for polydb-query
//!
//! Implements `DataSource` for file-based SQLite databases.
//!
//! Like the classic DB-API drivers, the adapter opens a transaction
//! implicitly before the first `INSERT`/`UPDATE`/`DELETE`/`REPLACE`, so
//! data changes stay pending until `commit()`. DDL runs in autocommit mode.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use polydb_query::{
    single_statement, split_statements, BackendKind, Capability, ColumnDescriptor, ConfigSpec,
    ConnectionConfig, DataError, DataSource, DataSourceFactory, DriverCell, EntityShape,
    ExecReport, FetchResult, KeyRole, Result, SchemaSnapshot, StatementKind, TransactionOutcome,
};
use rusqlite::{types::ValueRef, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error};

/// Configuration keys for the SQLite backend
pub const CONFIG_SPEC: ConfigSpec = ConfigSpec {
    backend: BackendKind::Sqlite,
    required: &["path"],
    defaults: &[],
};

static DRIVER: DriverCell<SqliteDriver> = DriverCell::new("sqlite");

/// Native driver settings shared by SQLite adapters
#[derive(Debug, Clone)]
pub struct SqliteDriver {
    flags: OpenFlags,
}

impl SqliteDriver {
    /// Process-wide driver, created on first use
    pub fn global() -> &'static SqliteDriver {
        DRIVER.get_or_init(|| {
            debug!("Using SQLite library {}", rusqlite::version());
            SqliteDriver::default()
        })
    }

    pub fn with_flags(flags: OpenFlags) -> Self {
        Self { flags }
    }

    fn open(&self, path: &Path) -> rusqlite::Result<Connection> {
        Connection::open_with_flags(path, self.flags)
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self {
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        }
    }
}

/// SQLite data source implementation
pub struct SqliteSource {
    path: PathBuf,
    driver: &'static SqliteDriver,
    conn: Option<Connection>,
    schema: Option<SchemaSnapshot>,
}

impl SqliteSource {
    /// Validate `config` and build an unconnected adapter
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        Self::with_driver(config, SqliteDriver::global())
    }

    pub fn with_driver(config: ConnectionConfig, driver: &'static SqliteDriver) -> Result<Self> {
        let validated = CONFIG_SPEC.validate(&config)?;

        Ok(Self {
            path: PathBuf::from(validated.value("path")),
            driver,
            conn: None,
            schema: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_connected(&mut self) -> Result<()> {
        if self.conn.is_none() {
            self.connect().await?;
        }
        Ok(())
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or_else(|| {
            DataError::NotConnected(format!("SQLite database '{}'", self.path.display()))
        })
    }

    /// Read table names and their column lists
    fn read_catalog(conn: &Connection) -> rusqlite::Result<SchemaSnapshot> {
        let mut tables_stmt =
            conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
        let tables = tables_stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut columns_stmt = conn.prepare(
            r#"
            SELECT name, type, "notnull", dflt_value, pk
            FROM pragma_table_info(?1)
            ORDER BY cid
            "#,
        )?;

        let mut snapshot = SchemaSnapshot::new();

        for table in tables {
            let columns = columns_stmt
                .query_map([table.as_str()], |row| {
                    let name: String = row.get(0)?;
                    let data_type: String = row.get(1)?;
                    let not_null: i64 = row.get(2)?;
                    let default: Option<String> = row.get(3)?;
                    let pk: i64 = row.get(4)?;

                    let mut column = ColumnDescriptor::new(name, data_type).with_default(default);
                    if not_null != 0 {
                        column = column.not_null();
                    }
                    if pk > 0 {
                        column = column.with_key(KeyRole::Primary);
                    }
                    Ok(column)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            snapshot.insert(table, EntityShape::Columns(columns));
        }

        Ok(snapshot)
    }

    /// Open the implicit transaction before a data change
    fn begin_if_needed(conn: &Connection, kind: StatementKind) -> rusqlite::Result<()> {
        if kind == StatementKind::Write && conn.is_autocommit() {
            conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }

    /// Run one statement to completion, returning (rows affected, rows read)
    fn run_statement(conn: &Connection, sql: &str) -> rusqlite::Result<(u64, usize)> {
        let kind = StatementKind::of(sql);
        Self::begin_if_needed(conn, kind)?;

        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query([])?;
        let mut read = 0;
        while rows.next()?.is_some() {
            read += 1;
        }

        let affected = if kind == StatementKind::Write {
            conn.changes() as u64
        } else {
            0
        };

        Ok((affected, read))
    }

    fn fetch_rows(
        conn: &Connection,
        sql: &str,
    ) -> rusqlite::Result<(Vec<String>, Vec<serde_json::Value>)> {
        Self::begin_if_needed(conn, StatementKind::of(sql))?;

        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();

        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                values.push(Self::value_to_json(row.get_ref(idx)?));
            }
            out.push(serde_json::Value::Array(values));
        }

        Ok((columns, out))
    }

    /// Convert a SQLite value to JSON; blobs become base64 strings
    fn value_to_json(value: ValueRef<'_>) -> serde_json::Value {
        match value {
            ValueRef::Null => serde_json::Value::Null,
            ValueRef::Integer(v) => serde_json::Value::Number(v.into()),
            ValueRef::Real(v) => serde_json::Number::from_f64(v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ValueRef::Text(v) => serde_json::Value::String(String::from_utf8_lossy(v).into_owned()),
            ValueRef::Blob(v) => serde_json::Value::String(BASE64.encode(v)),
        }
    }

    fn query_failed(sql: &str, e: rusqlite::Error) -> DataError {
        error!("SQLite statement failed: {}", e);
        DataError::QueryFailed(format!("{}\n\nQuery: {}", e, sql))
    }
}

#[async_trait]
impl DataSource for SqliteSource {
    fn source_type(&self) -> BackendKind {
        BackendKind::Sqlite
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

        debug!("Opening SQLite database: {}", self.path.display());

        let conn = self.driver.open(&self.path).map_err(|e| {
            DataError::ConnectionFailed(format!(
                "SQLite open of '{}' failed: {}",
                self.path.display(),
                e
            ))
        })?;
        self.conn = Some(conn);

        if let Err(e) = self.refresh_schema().await {
            self.conn = None;
            return Err(DataError::ConnectionFailed(format!(
                "SQLite database '{}' is unreadable: {}",
                self.path.display(),
                e
            )));
        }

        debug!("Successfully opened SQLite database: {}", self.path.display());
        Ok(())
    }

    async fn refresh_schema(&mut self) -> Result<()> {
        let snapshot = Self::read_catalog(self.conn()?)
            .map_err(|e| DataError::SchemaError(format!("Failed to read SQLite catalog: {}", e)))?;

        debug!("SQLite catalog has {} tables", snapshot.len());
        self.schema = Some(snapshot);
        Ok(())
    }

    fn schema(&self) -> Option<&SchemaSnapshot> {
        self.schema.as_ref()
    }

    async fn try_execute(&mut self, command: &str) -> Result<ExecReport> {
        self.ensure_connected().await?;

        let mut report = ExecReport::default();
        {
            let conn = self.conn()?;

            for statement in &split_statements(command) {
                debug!("Executing SQLite statement: {}", statement);

                let (affected, read) = Self::run_statement(conn, statement)
                    .map_err(|e| Self::query_failed(statement, e))?;

                if StatementKind::of(statement) == StatementKind::Read {
                    debug!("SELECT produced {} rows (not returned)", read);
                }

                report.statements_executed += 1;
                report.rows_affected += affected;
                report.rows_discarded += read;
            }
        }

        self.refresh_schema().await?;
        Ok(report)
    }

    async fn try_fetch(&mut self, command: &str) -> Result<FetchResult> {
        self.ensure_connected().await?;

        let sql = single_statement(command)?;
        let start = Instant::now();

        debug!("Fetching from SQLite: {}", sql);

        let (columns, rows) =
            Self::fetch_rows(self.conn()?, &sql).map_err(|e| Self::query_failed(&sql, e))?;

        let execution_ms = start.elapsed().as_millis() as u64;
        debug!("SQLite query returned {} rows in {}ms", rows.len(), execution_ms);

        self.refresh_schema().await?;
        Ok(FetchResult::new(columns, rows, execution_ms))
    }

    async fn commit(&mut self) -> Result<TransactionOutcome> {
        self.ensure_connected().await?;

        let conn = self.conn()?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")
                .map_err(|e| DataError::QueryFailed(format!("SQLite commit failed: {}", e)))?;
            debug!("Committed SQLite transaction");
        }

        Ok(TransactionOutcome::Committed)
    }

    /// Roll back, then close and reopen the connection so the next command
    /// starts from a fresh handle.
    async fn rollback(&mut self) -> Result<TransactionOutcome> {
        self.ensure_connected().await?;

        {
            let conn = self.conn()?;
            if !conn.is_autocommit() {
                conn.execute_batch("ROLLBACK").map_err(|e| {
                    DataError::QueryFailed(format!("SQLite rollback failed: {}", e))
                })?;
                debug!("Rolled back SQLite transaction");
            }
        }

        self.close().await?;
        self.connect().await?;

        Ok(TransactionOutcome::RolledBack)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            debug!("Closing SQLite database: {}", self.path.display());
            if let Err((_, e)) = conn.close() {
                error!("SQLite close reported an error: {}", e);
            }
        }
        Ok(())
    }
}

/// Builds [`SqliteSource`] adapters for the registry
#[derive(Debug, Default)]
pub struct SqliteFactory;

impl DataSourceFactory for SqliteFactory {
    fn backend_type(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn create_source(&self, config: ConnectionConfig) -> Result<Box<dyn DataSource>> {
        Ok(Box::new(SqliteSource::new(config)?))
    }
}
