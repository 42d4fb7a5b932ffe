// SPDX-License-Identifier: Apache-2.0

//! Attachment Strategies
//!
//! Mounts one datasource under its namespace in a catalog session. Two
//! strategies cover every provider:
//!
//! - [`DirectIngestion`]: reads a flat file or URL into a table inside a
//!   dedicated (in-memory or file-backed) catalog
//! - [`ForeignLink`]: links a whole remote database as a named catalog and
//!   enumerates its user tables
//!
//! Strategies are selected by the provider's [`ProviderKind`] through a
//! static dispatch table, so adding a provider never touches orchestration.

pub mod direct;
pub mod foreign;
pub mod introspect;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use qwery_core::{ColumnDef, Datasource, EngineResult};

use crate::engine::{quote_literal, SqlEngine};
use crate::providers::{PathStyle, ProviderKind, ProviderSpec};

pub use direct::DirectIngestion;
pub use foreign::ForeignLink;

/// A table mounted by an attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachedTable {
    pub schema: String,
    pub table: String,
    /// Fully-qualified path (`ns.table` or `ns.schema.table`).
    pub path: String,
    /// `None` when column extraction was skipped.
    pub columns: Option<Vec<ColumnDef>>,
}

impl AttachedTable {
    pub fn new(namespace: &str, schema: &str, table: &str, style: PathStyle) -> Self {
        Self {
            schema: schema.to_string(),
            table: table.to_string(),
            path: format_table_path(namespace, schema, table, style),
            columns: None,
        }
    }

    pub fn with_columns(mut self, columns: Vec<ColumnDef>) -> Self {
        self.columns = Some(columns);
        self
    }
}

/// Result of attaching one datasource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub datasource_id: String,
    pub provider: String,
    pub namespace: String,
    pub tables: Vec<AttachedTable>,
}

impl Attachment {
    pub fn has_all_columns(&self) -> bool {
        self.tables.iter().all(|t| t.columns.is_some())
    }
}

/// `ns.table` or `ns.schema.table` depending on the path style.
pub fn format_table_path(namespace: &str, schema: &str, table: &str, style: PathStyle) -> String {
    match style {
        PathStyle::TwoPart => format!("{namespace}.{table}"),
        PathStyle::ThreePart => format!("{namespace}.{schema}.{table}"),
    }
}

/// What a strategy needs from the session for one attach.
pub struct AttachContext<'a> {
    pub engine: &'a dyn SqlEngine,
    pub spec: &'a ProviderSpec,
    pub namespace: &'a str,
    pub conversation_id: Option<&'a str>,
    pub workspace: Option<&'a Path>,
}

impl AttachContext<'_> {
    /// `<workspace>/<conversation_id>/<namespace>.duckdb` when both are known.
    pub fn persistent_catalog_path(&self) -> Option<PathBuf> {
        match (self.workspace, self.conversation_id) {
            (Some(workspace), Some(conversation_id)) => Some(
                workspace
                    .join(conversation_id)
                    .join(format!("{}.duckdb", self.namespace)),
            ),
            _ => None,
        }
    }
}

#[async_trait]
pub trait AttachmentStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn attach(
        &self,
        ctx: &AttachContext<'_>,
        datasource: &Datasource,
    ) -> EngineResult<Attachment>;
}

static DIRECT_INGESTION: DirectIngestion = DirectIngestion;
static FOREIGN_LINK: ForeignLink = ForeignLink;

/// Strategy for a provider kind.
pub fn strategy_for(kind: ProviderKind) -> &'static dyn AttachmentStrategy {
    match kind {
        ProviderKind::DirectIngestion(_) => &DIRECT_INGESTION,
        ProviderKind::ForeignLink => &FOREIGN_LINK,
    }
}

/// Installs and loads `extension` unless the engine reports it loaded.
pub async fn ensure_extension(engine: &dyn SqlEngine, extension: &str) -> EngineResult<()> {
    let status = format!(
        "SELECT installed, loaded FROM duckdb_extensions() WHERE extension_name = {}",
        quote_literal(extension)
    );

    let (installed, loaded) = match engine.execute(&status).await {
        Ok(result) => result
            .rows
            .first()
            .map(|row| {
                let flag = |i| row.get(i).and_then(|v| v.as_bool()).unwrap_or(false);
                (flag(0), flag(1))
            })
            .unwrap_or((false, false)),
        Err(e) => {
            tracing::debug!(extension, error = %e, "Extension status unknown; installing");
            (false, false)
        }
    };

    if loaded {
        tracing::debug!(extension, "Extension already loaded");
        return Ok(());
    }
    if !installed {
        engine.execute_batch(&format!("INSTALL {extension};")).await?;
    }
    engine.execute_batch(&format!("LOAD {extension};")).await?;
    tracing::info!(extension, "Extension loaded");
    Ok(())
}
