// SPDX-License-Identifier: Apache-2.0

//! Foreign-link strategy
//!
//! Remote relational databases are linked as a whole catalog with
//! `ATTACH '<conn>' AS "ns" (TYPE ..., READ_ONLY)`. User tables are then
//! enumerated and their columns extracted with one batched query; per-table
//! `DESCRIBE` is only a fallback for when that query fails.

use std::collections::HashMap;

use async_trait::async_trait;

use qwery_core::{ColumnDef, Datasource, EngineResult, TableMetadata};

use crate::engine::{quote_ident, quote_literal};
use crate::observability::{redact_connection_string, Sensitive};
use crate::providers::PathStyle;

use super::introspect::{batched_columns, describe, is_attached, list_tables};
use super::{ensure_extension, AttachContext, AttachedTable, Attachment, AttachmentStrategy};

pub struct ForeignLink;

impl ForeignLink {
    fn attach_sql(ctx: &AttachContext<'_>, conn: &Sensitive<String>) -> String {
        let options = match ctx.spec.catalog_type {
            Some(tag) => format!("TYPE {tag}, READ_ONLY"),
            None => "READ_ONLY".to_string(),
        };
        format!(
            "ATTACH {} AS {} ({options})",
            quote_literal(conn.expose()),
            quote_ident(ctx.namespace)
        )
    }
}

#[async_trait]
impl AttachmentStrategy for ForeignLink {
    fn name(&self) -> &'static str {
        "foreign_link"
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
        if let Some(extension) = ctx.spec.extension {
            ensure_extension(ctx.engine, extension).await?;
        }

        let conn = Sensitive::new(ctx.spec.build_connection_string(datasource)?);

        if is_attached(ctx.engine, ctx.namespace).await? {
            tracing::debug!("Catalog already attached");
        } else {
            tracing::debug!(conn = %redact_connection_string(conn.expose()), "Linking catalog");
            match ctx.engine.execute_batch(&Self::attach_sql(ctx, &conn)).await {
                Ok(()) => {}
                Err(e) if e.is_already_exists() => tracing::debug!("Catalog already attached"),
                Err(e) => return Err(e),
            }
        }

        let tables = list_tables(ctx.engine, ctx.spec, ctx.namespace).await?;

        let (mut columns, described_one_by_one) =
            match batched_columns(ctx.engine, &[ctx.namespace]).await {
                Ok(metadata) => (columns_by_table(metadata), false),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Batched column query failed; describing tables one by one"
                    );
                    let mut described = HashMap::new();
                    for (schema, table) in &tables {
                        match describe(ctx.engine, ctx.namespace, schema, table).await {
                            Ok(cols) => {
                                described.insert((schema.clone(), table.clone()), cols);
                            }
                            Err(e) => tracing::warn!(schema, table, error = %e, "Skipping table"),
                        }
                    }
                    (described, true)
                }
            };

        let attached: Vec<AttachedTable> = tables
            .into_iter()
            .filter_map(|(schema, table)| {
                let cols = columns.remove(&(schema.clone(), table.clone()));
                // A table the fallback could not describe is skipped
                if cols.is_none() && described_one_by_one {
                    return None;
                }
                let mut entry =
                    AttachedTable::new(ctx.namespace, &schema, &table, PathStyle::ThreePart);
                entry.columns = cols;
                Some(entry)
            })
            .collect();

        tracing::info!(tables = attached.len(), "Foreign catalog linked");

        Ok(Attachment {
            datasource_id: datasource.id.clone(),
            provider: ctx.spec.id.to_string(),
            namespace: ctx.namespace.to_string(),
            tables: attached,
        })
    }
}

fn columns_by_table(metadata: Vec<TableMetadata>) -> HashMap<(String, String), Vec<ColumnDef>> {
    metadata
        .into_iter()
        .map(|t| ((t.schema, t.table), t.columns))
        .collect()
}
