//! SqlEngine trait definition
//!
//! This is the boundary with the embedded analytical engine. Every
//! operation the catalog needs (attaching a catalog, creating a table from a
//! file or URL, describing columns, installing/loading extensions, running
//! arbitrary SQL) is expressed as SQL issued through this trait.

use std::sync::Arc;

use async_trait::async_trait;

use qwery_core::{EngineResult, QueryResult};

/// Core trait implemented by the analytical engine backing a catalog session
#[async_trait]
pub trait SqlEngine: Send + Sync {
    /// Returns the unique identifier for this engine (e.g., "duckdb")
    fn engine_id(&self) -> &'static str;

    /// Executes a statement and returns its rows and column names
    async fn execute(&self, sql: &str) -> EngineResult<QueryResult>;

    /// Executes one or more statements that produce no rows (DDL, ATTACH, ...)
    async fn execute_batch(&self, sql: &str) -> EngineResult<()>;

    /// Closes the underlying connection; later calls fail.
    async fn close(&self) -> EngineResult<()>;
}

/// Opens a fresh engine for a conversation's catalog session
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn open(&self, conversation_id: &str) -> EngineResult<Arc<dyn SqlEngine>>;
}
