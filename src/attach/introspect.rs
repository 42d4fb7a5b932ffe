// SPDX-License-Identifier: Apache-2.0

//! Catalog introspection shared by the strategies and the session.

use qwery_core::{ColumnDef, EngineError, EngineResult, QueryResult, TableMetadata};

use crate::engine::{quote_ident, quote_literal, SqlEngine};
use crate::providers::{information_schema_columns, ProviderSpec};

/// `"ns"."schema"."table"`
pub fn qualified(namespace: &str, schema: &str, table: &str) -> String {
    format!(
        "{}.{}.{}",
        quote_ident(namespace),
        quote_ident(schema),
        quote_ident(table)
    )
}

fn text_column<'a>(result: &'a QueryResult, row: usize, name: &str) -> EngineResult<&'a str> {
    let idx = result
        .column_index(name)
        .ok_or_else(|| EngineError::introspection(format!("Result has no '{name}' column")))?;
    result.rows[row]
        .text(idx)
        .ok_or_else(|| EngineError::introspection(format!("Column '{name}' is not text")))
}

/// Whether a catalog named `namespace` is already attached.
pub async fn is_attached(engine: &dyn SqlEngine, namespace: &str) -> EngineResult<bool> {
    let sql = format!(
        "SELECT database_name FROM duckdb_databases() WHERE database_name = {}",
        quote_literal(namespace)
    );
    Ok(!engine.execute(&sql).await?.rows.is_empty())
}

/// `(schema, table)` pairs in a namespace, system tables removed.
pub async fn list_tables(
    engine: &dyn SqlEngine,
    spec: &ProviderSpec,
    namespace: &str,
) -> EngineResult<Vec<(String, String)>> {
    let result = engine
        .execute(&spec.tables_query(namespace))
        .await
        .map_err(|e| EngineError::introspection(format!("Failed to list tables: {e}")))?;

    let mut tables = Vec::with_capacity(result.rows.len());
    for row in 0..result.rows.len() {
        let schema = text_column(&result, row, "table_schema")?;
        let table = text_column(&result, row, "table_name")?;
        if spec.is_system_table(schema, table) {
            tracing::trace!(namespace, schema, table, "Skipping system table");
            continue;
        }
        tables.push((schema.to_string(), table.to_string()));
    }
    Ok(tables)
}

/// Columns of every table in `namespaces`, in one information-schema query.
///
/// Tables come back in catalog/schema/table order with columns in ordinal
/// order.
pub async fn batched_columns(
    engine: &dyn SqlEngine,
    namespaces: &[&str],
) -> EngineResult<Vec<TableMetadata>> {
    if namespaces.is_empty() {
        return Ok(Vec::new());
    }

    let result = engine
        .execute(&information_schema_columns(namespaces))
        .await
        .map_err(|e| EngineError::introspection(format!("Batched column query failed: {e}")))?;

    let mut tables: Vec<TableMetadata> = Vec::new();
    for row in 0..result.rows.len() {
        let catalog = text_column(&result, row, "table_catalog")?;
        let schema = text_column(&result, row, "table_schema")?;
        let table = text_column(&result, row, "table_name")?;
        let column = ColumnDef::new(
            text_column(&result, row, "column_name")?,
            text_column(&result, row, "data_type")?,
        );

        match tables.last_mut() {
            Some(last)
                if last.catalog == catalog && last.schema == schema && last.table == table =>
            {
                last.columns.push(column)
            }
            _ => tables.push(TableMetadata {
                catalog: catalog.to_string(),
                schema: schema.to_string(),
                table: table.to_string(),
                columns: vec![column],
            }),
        }
    }
    Ok(tables)
}

/// Columns of one table via `DESCRIBE`.
pub async fn describe(
    engine: &dyn SqlEngine,
    namespace: &str,
    schema: &str,
    table: &str,
) -> EngineResult<Vec<ColumnDef>> {
    let result = engine
        .execute(&format!("DESCRIBE {}", qualified(namespace, schema, table)))
        .await
        .map_err(|e| {
            EngineError::introspection(format!("DESCRIBE {namespace}.{schema}.{table} failed: {e}"))
        })?;

    (0..result.rows.len())
        .map(|row| {
            Ok(ColumnDef::new(
                text_column(&result, row, "column_name")?,
                text_column(&result, row, "column_type")?,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DuckDbEngine;
    use crate::providers::ProviderRegistry;

    async fn engine_with_catalog() -> DuckDbEngine {
        let engine = DuckDbEngine::open_in_memory().unwrap();
        engine
            .execute_batch(
                "ATTACH ':memory:' AS shop; \
                 CREATE TABLE shop.main.orders (id INTEGER, total DOUBLE); \
                 CREATE TABLE shop.main.customers (id INTEGER, name VARCHAR, email VARCHAR);",
            )
            .await
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn batched_columns_groups_by_table() {
        let engine = engine_with_catalog().await;
        let tables = batched_columns(&engine, &["shop"]).await.unwrap();

        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].table, "customers");
        let names: Vec<&str> = tables[0].columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "email"]);
        assert_eq!(tables[1].table, "orders");
        assert_eq!(tables[1].columns[1].column_type, "DOUBLE");
    }

    #[tokio::test]
    async fn list_and_describe() {
        let engine = engine_with_catalog().await;
        let registry = ProviderRegistry::with_builtin_providers().unwrap();
        let spec = registry.lookup("duckdb").unwrap();

        assert!(is_attached(&engine, "shop").await.unwrap());
        assert!(!is_attached(&engine, "nope").await.unwrap());

        let tables = list_tables(&engine, spec, "shop").await.unwrap();
        assert_eq!(
            tables,
            vec![
                ("main".to_string(), "customers".to_string()),
                ("main".to_string(), "orders".to_string()),
            ]
        );

        let columns = describe(&engine, "shop", "main", "orders").await.unwrap();
        assert_eq!(
            columns,
            vec![ColumnDef::new("id", "INTEGER"), ColumnDef::new("total", "DOUBLE")]
        );
    }

    #[test]
    fn qualified_names_are_quoted() {
        assert_eq!(qualified("a", "b", "we\"ird"), "\"a\".\"b\".\"we\"\"ird\"");
    }
}
