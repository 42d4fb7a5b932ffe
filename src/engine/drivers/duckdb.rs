// SPDX-License-Identifier: Apache-2.0

//! DuckDB Engine
//!
//! Implements the SqlEngine trait for DuckDB using the native `duckdb` crate.
//!
//! ## Catalog Layout
//!
//! - The session's main database is always in-memory
//! - Each datasource is mounted as its own attached catalog (namespace):
//!   foreign databases via `ATTACH ... (TYPE ...)`, direct-ingestion sources
//!   as an in-memory or file-backed DuckDB catalog
//!
//! ## Concurrency Model
//!
//! The `duckdb` crate provides a synchronous API. All operations are wrapped
//! in `tokio::task::spawn_blocking`. The `Connection` is `Send` but `!Sync`,
//! so it is protected by a `std::sync::Mutex`. Writers to different
//! namespaces are therefore serialized per session.
//!
//! Closing interrupts the running statement first, so a close issued after
//! a timeout does not wait for the query to finish on its own.

use std::sync::Arc;
use std::time::Instant;

use ::duckdb::{types::Value as DuckValue, Connection, InterruptHandle};
use async_trait::async_trait;

use qwery_core::{ColumnInfo, EngineError, EngineResult, QueryResult, Row, Value};

use crate::engine::traits::{EngineFactory, SqlEngine};

/// Wraps a DuckDB connection for one catalog session.
pub struct DuckDbEngine {
    /// `None` once the engine has been closed.
    conn: Arc<std::sync::Mutex<Option<Connection>>>,
    interrupt: Arc<InterruptHandle>,
}

impl DuckDbEngine {
    /// Creates a new in-memory DuckDB instance.
    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            EngineError::connection_failed(format!("Failed to open DuckDB in-memory: {e}"))
        })?;
        let interrupt = conn.interrupt_handle();
        Ok(Self {
            conn: Arc::new(std::sync::Mutex::new(Some(conn))),
            interrupt,
        })
    }

    /// Runs a synchronous closure on the connection inside spawn_blocking.
    async fn with_conn<F, R>(&self, f: F) -> EngineResult<R>
    where
        F: FnOnce(&Connection) -> EngineResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|e| {
                EngineError::internal(format!("Failed to lock DuckDB connection: {e}"))
            })?;
            let conn = guard
                .as_ref()
                .ok_or_else(|| EngineError::connection_failed("DuckDB connection is closed"))?;
            f(conn)
        })
        .await
        .map_err(|e| EngineError::internal(format!("DuckDB task panicked: {e}")))?
    }
}

// ==================== Type Conversion ====================

/// Converts a DuckDB value into a universal `Value`.
fn duckdb_to_value(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Bool(b),
        DuckValue::TinyInt(i) => Value::Int(i as i64),
        DuckValue::SmallInt(i) => Value::Int(i as i64),
        DuckValue::Int(i) => Value::Int(i as i64),
        DuckValue::BigInt(i) => Value::Int(i),
        DuckValue::UTinyInt(i) => Value::Int(i as i64),
        DuckValue::USmallInt(i) => Value::Int(i as i64),
        DuckValue::UInt(i) => Value::Int(i as i64),
        DuckValue::UBigInt(i) => match i64::try_from(i) {
            Ok(v) => Value::Int(v),
            Err(_) => Value::Text(i.to_string()),
        },
        DuckValue::HugeInt(i) => match i64::try_from(i) {
            Ok(v) => Value::Int(v),
            Err(_) => Value::Text(i.to_string()),
        },
        DuckValue::Float(f) => Value::Float(f as f64),
        DuckValue::Double(f) => Value::Float(f),
        DuckValue::Decimal(d) => Value::Text(d.to_string()),
        DuckValue::Text(s) => Value::Text(s),
        DuckValue::Enum(s) => Value::Text(s),
        DuckValue::Blob(b) => Value::Bytes(b),
        DuckValue::List(items) => Value::Array(items.into_iter().map(duckdb_to_value).collect()),
        other => Value::Text(format!("{other:?}")),
    }
}

/// Executes a statement and collects its rows and columns.
///
/// NOTE: DuckDB crate requires that `column_name()` is called AFTER the statement
/// has been executed (i.e., after iterating rows). We collect rows first, then
/// extract column names.
fn run_query(conn: &Connection, sql: &str, start: Instant) -> EngineResult<QueryResult> {
    let mut stmt = conn.prepare(sql).map_err(|e| classify_error(e.to_string()))?;

    let rows_iter = stmt
        .query_map([], |row| {
            let col_count = row.as_ref().column_count();
            let mut values = Vec::with_capacity(col_count);
            for i in 0..col_count {
                let value: DuckValue = row.get(i)?;
                values.push(duckdb_to_value(value));
            }
            Ok(Row { values })
        })
        .map_err(|e| classify_error(e.to_string()))?;

    let mut rows = Vec::new();
    for row_result in rows_iter {
        let row = row_result.map_err(|e| classify_error(e.to_string()))?;
        rows.push(row);
    }

    // After iteration, statement has been executed, so column_count and column_name work
    let column_count = stmt.column_count();
    let columns: Vec<ColumnInfo> = (0..column_count)
        .map(|i| ColumnInfo {
            name: stmt
                .column_name(i)
                .map(|s| s.to_string())
                .unwrap_or_else(|_| format!("col_{}", i)),
            data_type: stmt.column_type(i).to_string(),
            nullable: true,
        })
        .collect();

    Ok(QueryResult {
        columns,
        rows,
        execution_time_ms: start.elapsed().as_micros() as f64 / 1000.0,
    })
}

/// Classifies a DuckDB error message into syntax or execution error.
fn classify_error(msg: String) -> EngineError {
    let lower = msg.to_lowercase();
    if lower.contains("interrupt") {
        EngineError::Cancelled
    } else if lower.contains("syntax") || lower.contains("parser") {
        EngineError::syntax_error(msg)
    } else if lower.contains("io error")
        || lower.contains("could not connect")
        || lower.contains("connection")
    {
        EngineError::connection_failed(msg)
    } else {
        EngineError::execution_error(msg)
    }
}

// ==================== SqlEngine Implementation ====================

#[async_trait]
impl SqlEngine for DuckDbEngine {
    fn engine_id(&self) -> &'static str {
        "duckdb"
    }

    async fn execute(&self, sql: &str) -> EngineResult<QueryResult> {
        let sql = sql.to_string();
        self.with_conn(move |conn| run_query(conn, &sql, Instant::now()))
            .await
    }

    async fn execute_batch(&self, sql: &str) -> EngineResult<()> {
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            conn.execute_batch(&sql)
                .map_err(|e| classify_error(e.to_string()))
        })
        .await
    }

    async fn close(&self) -> EngineResult<()> {
        // Noop when nothing is running
        self.interrupt.interrupt();
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|e| {
                EngineError::internal(format!("Failed to lock DuckDB connection: {e}"))
            })?;
            // Connection is dropped here; attached catalogs are released with it
            guard.take();
            Ok(())
        })
        .await
        .map_err(|e| EngineError::internal(format!("DuckDB task panicked: {e}")))?
    }
}

/// Opens one in-memory DuckDB engine per conversation.
#[derive(Debug, Default, Clone, Copy)]
pub struct DuckDbEngineFactory;

#[async_trait]
impl EngineFactory for DuckDbEngineFactory {
    async fn open(&self, _conversation_id: &str) -> EngineResult<Arc<dyn SqlEngine>> {
        let engine = tokio::task::spawn_blocking(DuckDbEngine::open_in_memory)
            .await
            .map_err(|e| EngineError::internal(format!("DuckDB task panicked: {e}")))??;
        Ok(Arc::new(engine))
    }
}
