// SPDX-License-Identifier: Apache-2.0

//! Catalog Session
//!
//! One analytical-engine session per conversation, federating every
//! attached datasource under its own namespace. This is the surface the tool
//! layer talks to: attach/detach datasources, run SQL, pull metadata.
//!
//! Each attach is bounded by the attach timeout and each query by the query
//! timeout. A query that times out tears the session down: the connection is
//! closed in the background and every later call fails, so a possibly
//! corrupted connection is never reused.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;

use qwery_core::{ColumnInfo, Datasource, EngineError, EngineResult, ErrorKind, Row, TableMetadata};

use crate::attach::introspect::{batched_columns, describe};
use crate::attach::{strategy_for, AttachContext, Attachment};
use crate::config::CatalogConfig;
use crate::metrics;
use crate::naming::{disambiguated_namespace, namespace_name_for};
use crate::providers::ProviderRegistry;

use super::{quote_ident, SqlEngine};

#[derive(Debug, Clone, Serialize)]
pub struct QueryStats {
    pub row_count: usize,
    pub column_count: usize,
    pub elapsed_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Row>,
    pub stats: QueryStats,
}

impl QueryResponse {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// One datasource that could not be attached, and why.
#[derive(Debug, Clone, Serialize)]
pub struct AttachFailure {
    pub datasource_id: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl AttachFailure {
    pub fn new(datasource_id: impl Into<String>, error: &EngineError) -> Self {
        Self {
            datasource_id: datasource_id.into(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Outcome of a multi-datasource attach: partial success is normal.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AttachReport {
    pub attachments: Vec<Attachment>,
    pub failures: Vec<AttachFailure>,
}

impl AttachReport {
    /// At least one datasource is queryable.
    pub fn is_ready(&self) -> bool {
        !self.attachments.is_empty()
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.datasource_id.as_str()).collect()
    }
}

pub struct CatalogSession {
    engine: Arc<dyn SqlEngine>,
    registry: Arc<ProviderRegistry>,
    config: Arc<CatalogConfig>,
    conversation_id: Option<String>,
    attachments: RwLock<Vec<Attachment>>,
    closed: AtomicBool,
}

impl CatalogSession {
    /// Opens a session over `engine`. With a workspace and a conversation id
    /// the conversation's catalog directory is created up front.
    pub async fn connect(
        engine: Arc<dyn SqlEngine>,
        registry: Arc<ProviderRegistry>,
        config: Arc<CatalogConfig>,
        conversation_id: Option<String>,
    ) -> EngineResult<Self> {
        if let (Some(workspace), Some(conversation_id)) = (&config.workspace, &conversation_id) {
            let dir: PathBuf = workspace.join(conversation_id);
            tokio::fs::create_dir_all(&dir).await.map_err(|e| {
                EngineError::configuration(format!(
                    "Cannot create conversation workspace {}: {e}",
                    dir.display()
                ))
            })?;
        }

        tracing::debug!(
            engine = engine.engine_id(),
            conversation_id = conversation_id.as_deref().unwrap_or("-"),
            "Catalog session connected"
        );

        Ok(Self {
            engine,
            registry,
            config,
            conversation_id,
            attachments: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> EngineResult<()> {
        if self.is_closed() {
            Err(EngineError::connection_failed("Catalog session is closed"))
        } else {
            Ok(())
        }
    }

    pub fn attachments(&self) -> Vec<Attachment> {
        self.attachments.read().clone()
    }

    pub fn attachment(&self, datasource_id: &str) -> Option<Attachment> {
        self.attachments
            .read()
            .iter()
            .find(|a| a.datasource_id == datasource_id)
            .cloned()
    }

    pub fn has_datasource(&self, datasource_id: &str) -> bool {
        self.attachments
            .read()
            .iter()
            .any(|a| a.datasource_id == datasource_id)
    }

    /// Reuses the datasource's namespace when re-attaching; otherwise the
    /// derived name, suffixed when another datasource already holds it.
    fn resolve_namespace(&self, datasource: &Datasource) -> String {
        let attachments = self.attachments.read();
        if let Some(existing) = attachments.iter().find(|a| a.datasource_id == datasource.id) {
            return existing.namespace.clone();
        }

        let base = namespace_name_for(datasource);
        let taken = |name: &str| {
            attachments
                .iter()
                .any(|a| a.namespace.eq_ignore_ascii_case(name))
        };
        if taken(&base) {
            disambiguated_namespace(&base, &datasource.id, taken)
        } else {
            base
        }
    }

    /// Attaches one datasource. Idempotent: re-attaching replaces the
    /// previous attachment without duplicating tables.
    #[tracing::instrument(
        skip(self, datasource),
        fields(datasource_id = %datasource.id, provider = %datasource.provider)
    )]
    pub async fn attach(&self, datasource: &Datasource) -> EngineResult<Attachment> {
        self.ensure_open()?;
        let spec = self.registry.lookup(&datasource.provider)?;
        let namespace = self.resolve_namespace(datasource);

        let ctx = AttachContext {
            engine: self.engine.as_ref(),
            spec,
            namespace: &namespace,
            conversation_id: self.conversation_id.as_deref(),
            workspace: self.config.workspace.as_deref(),
        };
        let strategy = strategy_for(spec.kind);

        let outcome = tokio::time::timeout(
            self.config.attach_timeout(),
            strategy.attach(&ctx, datasource),
        )
        .await
        .unwrap_or_else(|_| {
            Err(EngineError::Timeout {
                timeout_ms: self.config.attach_timeout_ms,
            })
        });

        metrics::record_attach(outcome.is_ok());
        let attachment = match outcome {
            Ok(attachment) => attachment,
            Err(e) => {
                tracing::warn!(
                    namespace = %namespace,
                    strategy = strategy.name(),
                    error = %e,
                    "Attach failed"
                );
                return Err(e);
            }
        };

        let mut attachments = self.attachments.write();
        attachments.retain(|a| a.datasource_id != datasource.id);
        attachments.push(attachment.clone());
        Ok(attachment)
    }

    /// Attaches every datasource, collecting failures instead of stopping.
    ///
    /// Runs one at a time: the engine connection serializes writers anyway.
    pub async fn attach_all(&self, datasources: &[Datasource]) -> AttachReport {
        let mut report = AttachReport::default();
        for datasource in datasources {
            match self.attach(datasource).await {
                Ok(attachment) => report.attachments.push(attachment),
                Err(e) => report.failures.push(AttachFailure::new(&datasource.id, &e)),
            }
        }
        tracing::info!(
            attached = report.attachments.len(),
            failed = report.failures.len(),
            "Batch attach finished"
        );
        report
    }

    /// Detaches a datasource. Returns whether it was attached.
    pub async fn detach(&self, datasource_id: &str) -> EngineResult<bool> {
        self.ensure_open()?;
        let Some(attachment) = self.attachment(datasource_id) else {
            return Ok(false);
        };

        self.engine
            .execute_batch(&format!(
                "DETACH DATABASE IF EXISTS {}",
                quote_ident(&attachment.namespace)
            ))
            .await?;
        self.attachments
            .write()
            .retain(|a| a.datasource_id != datasource_id);
        tracing::info!(datasource_id, namespace = %attachment.namespace, "Datasource detached");
        Ok(true)
    }

    /// Runs SQL against the federated catalog.
    pub async fn query(&self, sql: &str) -> EngineResult<QueryResponse> {
        self.ensure_open()?;
        let start = Instant::now();

        let outcome =
            tokio::time::timeout(self.config.query_timeout(), self.engine.execute(sql)).await;
        let result = match outcome {
            Ok(result) => result,
            Err(_) => {
                metrics::record_timeout();
                tracing::warn!(
                    timeout_ms = self.config.query_timeout_ms,
                    "Query timed out; tearing session down"
                );
                self.teardown();
                return Err(EngineError::Timeout {
                    timeout_ms: self.config.query_timeout_ms,
                });
            }
        };

        let elapsed_ms = start.elapsed().as_micros() as f64 / 1000.0;
        metrics::record_query(elapsed_ms, result.is_ok());
        let result = result?;

        Ok(QueryResponse {
            stats: QueryStats {
                row_count: result.rows.len(),
                column_count: result.columns.len(),
                elapsed_ms,
            },
            columns: result.columns,
            rows: result.rows,
        })
    }

    /// Column metadata for the selected (default: all) attached datasources.
    ///
    /// One information-schema query covers every selected namespace; if it
    /// fails, tables are described one by one and failures skipped.
    pub async fn metadata(
        &self,
        datasource_ids: Option<&[String]>,
    ) -> EngineResult<Vec<TableMetadata>> {
        self.ensure_open()?;
        let selected: Vec<Attachment> = self
            .attachments
            .read()
            .iter()
            .filter(|a| datasource_ids.map_or(true, |ids| ids.contains(&a.datasource_id)))
            .cloned()
            .collect();
        if selected.is_empty() {
            return Ok(Vec::new());
        }

        let namespaces: Vec<&str> = selected.iter().map(|a| a.namespace.as_str()).collect();
        match batched_columns(self.engine.as_ref(), &namespaces).await {
            Ok(tables) => Ok(tables
                .into_iter()
                .filter(|t| !self.is_system_table(&selected, t))
                .collect()),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Batched metadata query failed; describing tables one by one"
                );
                let mut tables = Vec::new();
                for attachment in &selected {
                    for table in &attachment.tables {
                        let described = describe(
                            self.engine.as_ref(),
                            &attachment.namespace,
                            &table.schema,
                            &table.table,
                        )
                        .await;
                        match described {
                            Ok(columns) => tables.push(TableMetadata {
                                catalog: attachment.namespace.clone(),
                                schema: table.schema.clone(),
                                table: table.table.clone(),
                                columns,
                            }),
                            Err(e) => {
                                tracing::warn!(path = %table.path, error = %e, "Skipping table")
                            }
                        }
                    }
                }
                Ok(tables)
            }
        }
    }

    fn is_system_table(&self, attachments: &[Attachment], table: &TableMetadata) -> bool {
        attachments
            .iter()
            .find(|a| a.namespace.eq_ignore_ascii_case(&table.catalog))
            .and_then(|a| self.registry.lookup(&a.provider).ok())
            .map(|spec| spec.is_system_table(&table.schema, &table.table))
            .unwrap_or(false)
    }

    fn teardown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.attachments.write().clear();
        let engine = Arc::clone(&self.engine);
        // The timed-out statement may still hold the connection
        tokio::spawn(async move {
            if let Err(e) = engine.close().await {
                tracing::warn!(error = %e, "Failed to close engine after timeout");
            }
        });
    }

    /// Closes the session; attached catalogs are released with the engine.
    pub async fn close(&self) -> EngineResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.attachments.write().clear();
        self.engine.close().await
    }
}
