// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures: a scripted engine that plays a remote database catalog.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use qwery_catalog::engine::{EngineFactory, SqlEngine};
use qwery_catalog::Datasource;
use qwery_core::{ColumnInfo, ConfigMap, EngineError, EngineResult, QueryResult, Row, Value};

/// A table the scripted remote catalog exposes under every attached namespace.
#[derive(Clone)]
pub struct RemoteTable {
    pub schema: &'static str,
    pub table: &'static str,
    pub columns: Vec<(&'static str, &'static str)>,
}

impl RemoteTable {
    pub fn new(schema: &'static str, table: &'static str, columns: &[(&'static str, &'static str)]) -> Self {
        Self {
            schema,
            table,
            columns: columns.to_vec(),
        }
    }
}

/// Counts delayed statements running at once, across engines.
#[derive(Default)]
pub struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Answers the introspection statements the strategies issue and records
/// every statement it sees.
pub struct ScriptedEngine {
    tables: Vec<RemoteTable>,
    attached: Mutex<HashSet<String>>,
    statements: Mutex<Vec<String>>,
    column_queries: AtomicUsize,
    describes: AtomicUsize,
    fail_batched_columns: AtomicBool,
    query_delay: Mutex<Option<Duration>>,
    in_flight: Option<Arc<InFlight>>,
    closed: AtomicBool,
}

impl ScriptedEngine {
    pub fn new(tables: Vec<RemoteTable>) -> Self {
        Self {
            tables,
            attached: Mutex::new(HashSet::new()),
            statements: Mutex::new(Vec::new()),
            column_queries: AtomicUsize::new(0),
            describes: AtomicUsize::new(0),
            fail_batched_columns: AtomicBool::new(false),
            query_delay: Mutex::new(None),
            in_flight: None,
            closed: AtomicBool::new(false),
        }
    }

    /// Reports delayed statements to a gauge shared with other engines.
    pub fn with_gauge(mut self, gauge: Arc<InFlight>) -> Self {
        self.in_flight = Some(gauge);
        self
    }

    /// Two user tables plus one system table in `pg_catalog`.
    pub fn postgres_like() -> Self {
        Self::new(vec![
            RemoteTable::new("public", "orders", &[("id", "INTEGER"), ("total", "DOUBLE")]),
            RemoteTable::new("public", "users", &[("id", "INTEGER"), ("email", "VARCHAR")]),
            RemoteTable::new("pg_catalog", "pg_class", &[("oid", "INTEGER"), ("relname", "VARCHAR")]),
        ])
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    pub fn statement_count(&self) -> usize {
        self.statements.lock().len()
    }

    /// Batched `information_schema.columns` queries seen so far.
    pub fn column_queries(&self) -> usize {
        self.column_queries.load(Ordering::SeqCst)
    }

    pub fn describes(&self) -> usize {
        self.describes.load(Ordering::SeqCst)
    }

    pub fn fail_batched_columns(&self, fail: bool) {
        self.fail_batched_columns.store(fail, Ordering::SeqCst);
    }

    /// Delays every statement that is not introspection.
    pub fn set_query_delay(&self, delay: Duration) {
        *self.query_delay.lock() = Some(delay);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn text_result(columns: &[&str], rows: Vec<Vec<String>>) -> QueryResult {
        QueryResult::new(
            columns.iter().map(|c| ColumnInfo::new(*c, "VARCHAR")).collect(),
            rows.into_iter()
                .map(|r| Row::new(r.into_iter().map(Value::Text).collect()))
                .collect(),
        )
    }

    fn is_attached(&self, namespace: &str) -> bool {
        self.attached.lock().contains(namespace)
    }

    fn respond(&self, sql: &str) -> EngineResult<Option<QueryResult>> {
        if sql.contains("duckdb_extensions()") {
            return Ok(Some(QueryResult::new(
                vec![ColumnInfo::new("installed", "BOOLEAN"), ColumnInfo::new("loaded", "BOOLEAN")],
                vec![Row::new(vec![Value::Bool(true), Value::Bool(true)])],
            )));
        }

        if sql.contains("duckdb_databases()") {
            let rows = literals(sql)
                .into_iter()
                .filter(|ns| self.is_attached(ns))
                .map(|ns| vec![ns])
                .collect();
            return Ok(Some(Self::text_result(&["database_name"], rows)));
        }

        if sql.contains("information_schema.tables") {
            let rows = literals(sql)
                .into_iter()
                .filter(|ns| self.is_attached(ns))
                .flat_map(|_| {
                    self.tables
                        .iter()
                        .map(|t| vec![t.schema.to_string(), t.table.to_string()])
                })
                .collect();
            return Ok(Some(Self::text_result(&["table_schema", "table_name"], rows)));
        }

        if sql.contains("information_schema.columns") {
            self.column_queries.fetch_add(1, Ordering::SeqCst);
            if self.fail_batched_columns.load(Ordering::SeqCst) {
                return Err(EngineError::execution_error("Catalog Error: information_schema unavailable"));
            }
            let mut rows = Vec::new();
            for ns in literals(sql).into_iter().filter(|ns| self.is_attached(ns)) {
                for t in &self.tables {
                    for (column, data_type) in &t.columns {
                        rows.push(vec![
                            ns.clone(),
                            t.schema.to_string(),
                            t.table.to_string(),
                            column.to_string(),
                            data_type.to_string(),
                        ]);
                    }
                }
            }
            return Ok(Some(Self::text_result(
                &["table_catalog", "table_schema", "table_name", "column_name", "data_type"],
                rows,
            )));
        }

        if let Some(target) = sql.strip_prefix("DESCRIBE ") {
            self.describes.fetch_add(1, Ordering::SeqCst);
            let parts: Vec<String> = target.split('.').map(|p| p.trim_matches('"').to_string()).collect();
            let table = self
                .tables
                .iter()
                .find(|t| parts.len() == 3 && t.schema == parts[1] && t.table == parts[2])
                .ok_or_else(|| EngineError::execution_error(format!("Table {target} does not exist")))?;
            let rows = table
                .columns
                .iter()
                .map(|(c, ty)| vec![c.to_string(), ty.to_string()])
                .collect();
            return Ok(Some(Self::text_result(&["column_name", "column_type"], rows)));
        }

        if sql.starts_with("ATTACH ") {
            if let Some(ns) = quoted_alias(sql) {
                if !self.attached.lock().insert(ns.clone()) {
                    return Err(EngineError::execution_error(format!(
                        "Binder Error: Database \"{ns}\" is already attached"
                    )));
                }
            }
            return Ok(Some(QueryResult::empty()));
        }

        if let Some(rest) = sql.strip_prefix("DETACH DATABASE IF EXISTS ") {
            self.attached.lock().remove(rest.trim_matches('"'));
            return Ok(Some(QueryResult::empty()));
        }

        Ok(None)
    }
}

/// Every `'...'` literal in `sql`.
fn literals(sql: &str) -> Vec<String> {
    sql.split('\'')
        .enumerate()
        .filter(|(i, _)| i % 2 == 1)
        .map(|(_, s)| s.to_string())
        .collect()
}

/// The `AS "ns"` alias of an ATTACH statement.
fn quoted_alias(sql: &str) -> Option<String> {
    let (_, rest) = sql.rsplit_once(" AS \"")?;
    let (ns, _) = rest.split_once('"')?;
    Some(ns.to_string())
}

#[async_trait]
impl SqlEngine for ScriptedEngine {
    fn engine_id(&self) -> &'static str {
        "scripted"
    }

    async fn execute(&self, sql: &str) -> EngineResult<QueryResult> {
        if self.is_closed() {
            return Err(EngineError::connection_failed("Connection closed"));
        }
        self.statements.lock().push(sql.to_string());

        if let Some(result) = self.respond(sql)? {
            return Ok(result);
        }
        let delay = *self.query_delay.lock();
        if let Some(delay) = delay {
            if let Some(gauge) = &self.in_flight {
                gauge.enter();
            }
            tokio::time::sleep(delay).await;
            if let Some(gauge) = &self.in_flight {
                gauge.leave();
            }
        }
        Ok(Self::text_result(&["answer"], vec![vec!["42".to_string()]]))
    }

    async fn execute_batch(&self, sql: &str) -> EngineResult<()> {
        self.execute(sql).await.map(|_| ())
    }

    async fn close(&self) -> EngineResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out a fresh scripted engine per conversation and remembers them.
pub struct ScriptedEngineFactory {
    make: Box<dyn Fn() -> ScriptedEngine + Send + Sync>,
    opened: Mutex<Vec<Arc<ScriptedEngine>>>,
}

impl ScriptedEngineFactory {
    pub fn new<F>(make: F) -> Self
    where
        F: Fn() -> ScriptedEngine + Send + Sync + 'static,
    {
        Self {
            make: Box::new(make),
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn opened(&self) -> Vec<Arc<ScriptedEngine>> {
        self.opened.lock().clone()
    }

    pub fn last(&self) -> Option<Arc<ScriptedEngine>> {
        self.opened.lock().last().cloned()
    }
}

#[async_trait]
impl EngineFactory for ScriptedEngineFactory {
    async fn open(&self, _conversation_id: &str) -> EngineResult<Arc<dyn SqlEngine>> {
        let engine = Arc::new((self.make)());
        self.opened.lock().push(Arc::clone(&engine));
        Ok(engine)
    }
}

pub fn config(value: serde_json::Value) -> ConfigMap {
    value.as_object().cloned().unwrap_or_default()
}

pub fn postgres(id: &str, name: &str) -> Datasource {
    Datasource::new(
        id,
        name,
        "postgresql",
        config(json!({
            "host": "db.internal",
            "port": 5432,
            "user": "analyst",
            "password": "s3cret",
            "database": "shop"
        })),
    )
}

pub fn csv(id: &str, name: &str, path: &std::path::Path) -> Datasource {
    Datasource::new(id, name, "csv", config(json!({ "path": path.to_string_lossy() })))
}
