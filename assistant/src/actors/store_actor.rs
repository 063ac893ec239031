//! Store Actor - owns access to the finance SQLite database.
//!
//! This actor handles:
//! - Creating the finance schema on first use
//! - Loading the demo rows on request
//! - Running read queries on read-only connections
//! - Running parameterized writes for the CRUD tools
//!
//! Each request opens its own connection inside `spawn_blocking`, so slow
//! queries from one conversation do not hold up another.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::store_schema::{DEMO_DATA, FINANCE_SCHEMA, FINANCE_SCHEMA_VERSION};

/// A result row keyed by column name.
pub type SqlRow = serde_json::Map<String, Value>;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database did not answer within {0:?}")]
    Timeout(Duration),
    #[error("the store actor is not running")]
    ActorUnavailable,
    #[error("store task failed: {0}")]
    TaskFailed(String),
    #[error("unsupported parameter value: {0}")]
    UnsupportedParameter(String),
    #[error("invalid demo data: {0}")]
    DemoData(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRows {
    pub rows: Vec<SqlRow>,
    /// More rows matched than were returned
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOutcome {
    pub affected_rows: usize,
    pub last_insert_id: i64,
}

/// Messages for the Store Actor
#[derive(Debug)]
pub enum StoreMsg {
    /// Create missing tables
    EnsureSchema {
        respond_to: oneshot::Sender<Result<(), StoreError>>,
    },
    /// Load demo rows into empty tables
    SeedDemo {
        respond_to: oneshot::Sender<Result<usize, StoreError>>,
    },
    /// Run a read query on a read-only connection
    Query {
        sql: String,
        params: Vec<Value>,
        max_rows: usize,
        respond_to: oneshot::Sender<Result<QueryRows, StoreError>>,
    },
    /// Run a single parameterized write
    Execute {
        sql: String,
        params: Vec<Value>,
        respond_to: oneshot::Sender<Result<ExecOutcome, StoreError>>,
    },
}

/// Store Actor
pub struct StoreActor {
    rx: mpsc::Receiver<StoreMsg>,
    db_path: PathBuf,
}

impl StoreActor {
    pub fn new(rx: mpsc::Receiver<StoreMsg>, db_path: PathBuf) -> Self {
        Self { rx, db_path }
    }

    /// Run the actor's message loop
    pub async fn run(mut self) {
        tracing::info!(db_path = %self.db_path.display(), "store actor started");

        while let Some(msg) = self.rx.recv().await {
            let db_path = self.db_path.clone();
            match msg {
                StoreMsg::EnsureSchema { respond_to } => {
                    // Schema work is serialized through the actor loop.
                    let result = run_blocking(move || ensure_schema_sync(&db_path)).await;
                    let _ = respond_to.send(result);
                }
                StoreMsg::SeedDemo { respond_to } => {
                    let result = run_blocking(move || seed_demo_sync(&db_path)).await;
                    let _ = respond_to.send(result);
                }
                StoreMsg::Query {
                    sql,
                    params,
                    max_rows,
                    respond_to,
                } => {
                    tokio::spawn(async move {
                        let result =
                            run_blocking(move || query_sync(&db_path, &sql, &params, max_rows))
                                .await;
                        let _ = respond_to.send(result);
                    });
                }
                StoreMsg::Execute {
                    sql,
                    params,
                    respond_to,
                } => {
                    tokio::spawn(async move {
                        let result =
                            run_blocking(move || execute_sync(&db_path, &sql, &params)).await;
                        let _ = respond_to.send(result);
                    });
                }
            }
        }

        tracing::info!("store actor stopped");
    }
}

/// Cloneable front door to the store actor.
#[derive(Debug, Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreMsg>,
    timeout: Duration,
}

impl StoreHandle {
    pub fn new(tx: mpsc::Sender<StoreMsg>, timeout: Duration) -> Self {
        Self { tx, timeout }
    }

    /// Spawn a store actor for `db_path` on the current runtime.
    pub fn spawn(db_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(StoreActor::new(rx, db_path.into()).run());
        Self::new(tx, timeout)
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.request(|respond_to| StoreMsg::EnsureSchema { respond_to })
            .await
    }

    /// Returns the number of rows inserted; tables that already hold rows are skipped.
    pub async fn seed_demo(&self) -> Result<usize, StoreError> {
        self.request(|respond_to| StoreMsg::SeedDemo { respond_to })
            .await
    }

    pub async fn query(
        &self,
        sql: impl Into<String>,
        params: Vec<Value>,
        max_rows: usize,
    ) -> Result<QueryRows, StoreError> {
        let sql = sql.into();
        self.request(|respond_to| StoreMsg::Query {
            sql,
            params,
            max_rows,
            respond_to,
        })
        .await
    }

    pub async fn execute(
        &self,
        sql: impl Into<String>,
        params: Vec<Value>,
    ) -> Result<ExecOutcome, StoreError> {
        let sql = sql.into();
        self.request(|respond_to| StoreMsg::Execute {
            sql,
            params,
            respond_to,
        })
        .await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, StoreError>>) -> StoreMsg,
    ) -> Result<T, StoreError> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(build(respond_to))
            .await
            .map_err(|_| StoreError::ActorUnavailable)?;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(StoreError::ActorUnavailable),
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }
}

async fn run_blocking<T, F>(work: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StoreError::TaskFailed(e.to_string()))?
}

fn ensure_schema_sync(db_path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| StoreError::TaskFailed(format!("cannot create {}: {}", parent.display(), e)))?;
    }

    let conn = Connection::open(db_path)?;
    let current_version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    conn.execute_batch(FINANCE_SCHEMA)?;

    if current_version != FINANCE_SCHEMA_VERSION {
        conn.execute_batch(&format!("PRAGMA user_version = {}", FINANCE_SCHEMA_VERSION))?;
        tracing::info!(
            from = current_version,
            to = FINANCE_SCHEMA_VERSION,
            "finance schema version updated"
        );
    }
    Ok(())
}

fn seed_demo_sync(db_path: &Path) -> Result<usize, StoreError> {
    ensure_schema_sync(db_path)?;
    let mut conn = Connection::open(db_path)?;
    let tx = conn.transaction()?;
    let mut inserted = 0;

    for (table, csv_text) in DEMO_DATA {
        let existing: i64 =
            tx.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        if existing > 0 {
            tracing::debug!(table, existing, "table already has rows, skipping demo data");
            continue;
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(csv_text.as_bytes());
        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| StoreError::DemoData(format!("{}: {}", table, e)))?
            .iter()
            .map(str::to_string)
            .collect();
        let placeholders: Vec<String> = (1..=headers.len()).map(|i| format!("?{}", i)).collect();
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            headers.join(", "),
            placeholders.join(", ")
        );

        let mut stmt = tx.prepare(&insert_sql)?;
        for record in reader.records() {
            let record = record.map_err(|e| StoreError::DemoData(format!("{}: {}", table, e)))?;
            let values: Vec<SqlValue> = record
                .iter()
                .map(|field| {
                    if field.is_empty() {
                        SqlValue::Null
                    } else {
                        SqlValue::Text(field.to_string())
                    }
                })
                .collect();
            stmt.execute(params_from_iter(values.iter()))?;
            inserted += 1;
        }
    }

    tx.commit()?;
    tracing::info!(inserted, "demo data loaded");
    Ok(inserted)
}

fn query_sync(
    db_path: &Path,
    sql: &str,
    params: &[Value],
    max_rows: usize,
) -> Result<QueryRows, StoreError> {
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    let bound = bind_params(params)?;

    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let mut rows_iter = stmt.query(params_from_iter(bound.iter()))?;

    let mut result = QueryRows::default();
    while let Some(row) = rows_iter.next()? {
        if result.rows.len() == max_rows {
            result.truncated = true;
            break;
        }
        let mut out = SqlRow::new();
        for (idx, name) in columns.iter().enumerate() {
            out.insert(name.clone(), sqlite_to_json(row.get_ref(idx)?));
        }
        result.rows.push(out);
    }

    Ok(result)
}

fn execute_sync(db_path: &Path, sql: &str, params: &[Value]) -> Result<ExecOutcome, StoreError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    let bound = bind_params(params)?;
    let affected_rows = conn.execute(sql, params_from_iter(bound.iter()))?;
    Ok(ExecOutcome {
        affected_rows,
        last_insert_id: conn.last_insert_rowid(),
    })
}

fn bind_params(params: &[Value]) -> Result<Vec<SqlValue>, StoreError> {
    params
        .iter()
        .map(|value| match value {
            Value::Null => Ok(SqlValue::Null),
            Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(SqlValue::Integer(i)),
                None => n
                    .as_f64()
                    .map(SqlValue::Real)
                    .ok_or_else(|| StoreError::UnsupportedParameter(n.to_string())),
            },
            Value::String(s) => Ok(SqlValue::Text(s.clone())),
            other => Err(StoreError::UnsupportedParameter(other.to_string())),
        })
        .collect()
}

fn sqlite_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(bytes.iter().map(|b| format!("{:02x}", b)).collect()),
    }
}
