// SPDX-License-Identifier: Apache-2.0

//! Direct-ingestion strategy
//!
//! Flat files and URLs (CSV, JSON, Parquet, spreadsheet exports) are read
//! into a table inside the datasource's own catalog:
//!
//! 1. attach the namespace catalog (file-backed per conversation when a
//!    workspace is configured, otherwise in-memory); an existing one is reused
//! 2. drop every table a previous run left in it
//! 3. `CREATE TABLE ... AS SELECT * FROM read_*(...)` under a working name
//! 4. check the table answers a bounded select
//! 5. describe it and rename it to a semantic name (best effort); a name
//!    another table in the namespace holds falls back to the datasource name

use async_trait::async_trait;

use qwery_core::{Datasource, EngineError, EngineResult};

use crate::engine::{quote_ident, quote_literal};
use crate::naming::{id_token, sanitize, semantic_table_name_for, TableSchemaHint};
use crate::providers::{PathStyle, ProviderKind};

use super::introspect::{describe, is_attached, list_tables, qualified};
use super::{ensure_extension, AttachContext, AttachedTable, Attachment, AttachmentStrategy};

const SCHEMA: &str = "main";

pub struct DirectIngestion;

#[async_trait]
impl AttachmentStrategy for DirectIngestion {
    fn name(&self) -> &'static str {
        "direct_ingestion"
    }

    #[tracing::instrument(
        skip(self, ctx, datasource),
        fields(
            datasource_id = %datasource.id,
            provider = %datasource.provider,
            namespace = %ctx.namespace
        )
    )]
    async fn attach(
        &self,
        ctx: &AttachContext<'_>,
        datasource: &Datasource,
    ) -> EngineResult<Attachment> {
        let ProviderKind::DirectIngestion(format) = ctx.spec.kind else {
            return Err(EngineError::internal(format!(
                "Provider '{}' is not a direct-ingestion provider",
                ctx.spec.id
            )));
        };

        let location = ctx.spec.build_connection_string(datasource)?;

        let catalog_path = ctx.persistent_catalog_path();
        if ctx.spec.requires_persistence && catalog_path.is_none() {
            return Err(EngineError::configuration(format!(
                "Provider '{}' requires a workspace and a conversation id",
                ctx.spec.id
            )));
        }

        if let Some(extension) = ctx.spec.extension {
            ensure_extension(ctx.engine, extension).await?;
        } else if is_remote(&location) {
            ensure_extension(ctx.engine, "httpfs").await?;
        }

        // 1. Namespace catalog
        if !is_attached(ctx.engine, ctx.namespace).await? {
            let target = match &catalog_path {
                Some(path) => {
                    if let Some(dir) = path.parent() {
                        tokio::fs::create_dir_all(dir).await.map_err(|e| {
                            EngineError::configuration(format!(
                                "Cannot create catalog directory {}: {e}",
                                dir.display()
                            ))
                        })?;
                    }
                    path.to_string_lossy().into_owned()
                }
                None => ":memory:".to_string(),
            };
            let attach_sql = format!(
                "ATTACH IF NOT EXISTS {} AS {}",
                quote_literal(&target),
                quote_ident(ctx.namespace)
            );
            match ctx.engine.execute_batch(&attach_sql).await {
                Ok(()) => tracing::debug!(persistent = catalog_path.is_some(), "Namespace created"),
                Err(e) if e.is_already_exists() => tracing::debug!("Namespace already present"),
                Err(e) => return Err(e),
            }
        } else {
            tracing::debug!("Namespace already present");
        }

        // 2. Start from a clean table set
        for (schema, table) in list_tables(ctx.engine, ctx.spec, ctx.namespace).await? {
            ctx.engine
                .execute_batch(&format!(
                    "DROP TABLE IF EXISTS {}",
                    qualified(ctx.namespace, &schema, &table)
                ))
                .await?;
            tracing::debug!(schema, table, "Dropped prior table");
        }

        // 3. Materialize
        let working_name = format!("tmp_{}", id_token(&datasource.id));
        let working = qualified(ctx.namespace, SCHEMA, &working_name);
        ctx.engine
            .execute_batch(&format!(
                "CREATE OR REPLACE TABLE {working} AS {}",
                format.select_from(&location)
            ))
            .await?;

        // 4. Check it answers
        ctx.engine
            .execute(&format!("SELECT * FROM {working} LIMIT 1"))
            .await
            .map_err(|e| {
                EngineError::execution_error(format!(
                    "Ingested table for datasource {} is not queryable: {e}",
                    datasource.id
                ))
            })?;

        // 5. Describe, then rename
        let columns = match describe(ctx.engine, ctx.namespace, SCHEMA, &working_name).await {
            Ok(columns) => Some(columns),
            Err(e) => {
                tracing::warn!(error = %e, "Column extraction skipped");
                None
            }
        };

        // Names still present in the namespace besides the working table
        let existing: Vec<String> = match list_tables(ctx.engine, ctx.spec, ctx.namespace).await {
            Ok(tables) => tables
                .into_iter()
                .map(|(_, table)| table)
                .filter(|table| *table != working_name)
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Could not list tables before renaming");
                Vec::new()
            }
        };
        let fallback = if sanitize(&datasource.name).is_some() {
            datasource.name.as_str()
        } else {
            datasource.provider.as_str()
        };
        let proposed = semantic_table_name_for(
            &TableSchemaHint {
                columns: columns.as_deref().unwrap_or_default(),
                source: Some(&location),
            },
            &existing,
            fallback,
        );
        let final_name = if proposed == working_name {
            working_name
        } else {
            let rename =
                format!("ALTER TABLE {working} RENAME TO {}", quote_ident(&proposed));
            match ctx.engine.execute_batch(&rename).await {
                Ok(()) => proposed,
                Err(e) => {
                    tracing::warn!(
                        working = %working_name,
                        proposed = %proposed,
                        error = %e,
                        "Rename failed; keeping working name"
                    );
                    working_name
                }
            }
        };

        let mut table = AttachedTable::new(ctx.namespace, SCHEMA, &final_name, PathStyle::TwoPart);
        table.columns = columns;
        tracing::info!(table = %table.path, "Datasource ingested");

        Ok(Attachment {
            datasource_id: datasource.id.clone(),
            provider: ctx.spec.id.to_string(),
            namespace: ctx.namespace.to_string(),
            tables: vec![table],
        })
    }
}

fn is_remote(location: &str) -> bool {
    location.contains("://")
}
