// SPDX-License-Identifier: Apache-2.0

//! Schema Cache
//!
//! Per-conversation memory of `datasource → schema → table → columns`, plus
//! the provider and namespace each datasource was loaded with. Those side
//! maps decide how table paths are formatted: direct-ingestion sources use
//! `namespace.table`, foreign databases `namespace.schema.table`.
//!
//! Matching raw metadata to a datasource is by catalog name (the namespace,
//! case-insensitive). For direct-ingestion providers a narrow fallback also
//! claims tables whose name carries the datasource id as a run of `_`
//! tokens, provided their catalog is not another datasource's namespace.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use qwery_core::{ColumnDef, TableMetadata};

use crate::attach::format_table_path;
use crate::naming::sanitize;
use crate::providers::{PathStyle, ProviderRegistry};

use super::registry::ConversationMap;

type Tables = BTreeMap<String, Vec<ColumnDef>>;
type Schemas = BTreeMap<String, Tables>;

#[derive(Debug, Clone)]
struct DatasourceEntry {
    provider: String,
    namespace: String,
    schemas: Schemas,
}

/// Filters for [`SchemaCache::to_simple_schemas`]; `None` selects everything.
#[derive(Debug, Clone, Default)]
pub struct SchemaFilter {
    pub datasource_ids: Option<Vec<String>>,
    pub schema_names: Option<Vec<String>>,
    pub table_names: Option<Vec<String>>,
}

impl SchemaFilter {
    fn matches(list: &Option<Vec<String>>, value: &str) -> bool {
        list.as_ref()
            .map_or(true, |items| items.iter().any(|i| i.eq_ignore_ascii_case(value)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimpleColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimpleTable {
    pub name: String,
    pub path: String,
    pub columns: Vec<SimpleColumn>,
}

/// What the calling agent sees for one datasource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimpleSchema {
    pub datasource_id: String,
    pub provider: String,
    pub namespace: String,
    pub tables: Vec<SimpleTable>,
}

pub struct SchemaCache {
    providers: Arc<ProviderRegistry>,
    entries: RwLock<HashMap<String, DatasourceEntry>>,
}

impl SchemaCache {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self {
            providers,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Replaces the cached schema of one datasource with what `raw` holds
    /// for it. Returns the number of tables recorded.
    pub fn load_schema_for_datasource(
        &self,
        datasource_id: &str,
        raw: &[TableMetadata],
        provider: &str,
        namespace: &str,
    ) -> usize {
        let mut entries = self.entries.write();

        let mut matched: Vec<&TableMetadata> = raw
            .iter()
            .filter(|t| t.catalog.eq_ignore_ascii_case(namespace))
            .collect();

        if matched.is_empty() && self.providers.is_direct_ingestion(provider) {
            let claimed = |catalog: &str| {
                entries.iter().any(|(id, e)| {
                    id != datasource_id && e.namespace.eq_ignore_ascii_case(catalog)
                })
            };
            matched = raw
                .iter()
                .filter(|t| !claimed(&t.catalog) && embeds_datasource_id(&t.table, datasource_id))
                .collect();
            if !matched.is_empty() {
                tracing::debug!(
                    datasource_id,
                    tables = matched.len(),
                    "Matched direct-ingestion tables by datasource id"
                );
            }
        }

        let mut schemas = Schemas::new();
        for table in &matched {
            schemas
                .entry(table.schema.clone())
                .or_default()
                .insert(table.table.clone(), table.columns.clone());
        }
        let count = matched.len();

        entries.insert(
            datasource_id.to_string(),
            DatasourceEntry {
                provider: provider.to_string(),
                namespace: namespace.to_string(),
                schemas,
            },
        );
        count
    }

    pub fn is_cached(&self, datasource_id: &str) -> bool {
        self.entries.read().contains_key(datasource_id)
    }

    pub fn invalidate(&self, datasource_id: &str) -> bool {
        self.entries.write().remove(datasource_id).is_some()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn datasource_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn namespace_of(&self, datasource_id: &str) -> Option<String> {
        self.entries
            .read()
            .get(datasource_id)
            .map(|e| e.namespace.clone())
    }

    /// `(schema, table)` pairs, optionally limited to one schema.
    pub fn get_tables(&self, datasource_id: &str, schema: Option<&str>) -> Vec<(String, String)> {
        let entries = self.entries.read();
        let Some(entry) = entries.get(datasource_id) else {
            return Vec::new();
        };
        entry
            .schemas
            .iter()
            .filter(|(name, _)| schema.map_or(true, |s| s.eq_ignore_ascii_case(name)))
            .flat_map(|(schema, tables)| {
                tables.keys().map(move |table| (schema.clone(), table.clone()))
            })
            .collect()
    }

    pub fn get_columns(
        &self,
        datasource_id: &str,
        schema: &str,
        table: &str,
    ) -> Option<Vec<ColumnDef>> {
        self.entries
            .read()
            .get(datasource_id)?
            .schemas
            .get(schema)?
            .get(table)
            .cloned()
    }

    fn path_style(&self, entry: &DatasourceEntry) -> PathStyle {
        self.providers.path_style(&entry.provider)
    }

    /// Fully-qualified path of a cached table.
    ///
    /// A `table` that is already a path under this datasource's namespace is
    /// returned unchanged, so formatting twice is a no-op.
    pub fn get_table_path(&self, datasource_id: &str, schema: &str, table: &str) -> Option<String> {
        let entries = self.entries.read();
        let entry = entries.get(datasource_id)?;

        let prefix = format!("{}.", entry.namespace);
        if table.len() > prefix.len()
            && table
                .get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(&prefix))
        {
            return Some(table.to_string());
        }
        Some(format_table_path(&entry.namespace, schema, table, self.path_style(entry)))
    }

    /// Whether any cached datasource exposes `path` (case-insensitive).
    pub fn has_table_path(&self, path: &str) -> bool {
        let entries = self.entries.read();
        entries.values().any(|entry| {
            let style = self.path_style(entry);
            entry.schemas.iter().any(|(schema, tables)| {
                tables.keys().any(|table| {
                    format_table_path(&entry.namespace, schema, table, style)
                        .eq_ignore_ascii_case(path)
                })
            })
        })
    }

    /// Filtered, serializable view keyed by datasource id.
    pub fn to_simple_schemas(&self, filter: &SchemaFilter) -> BTreeMap<String, SimpleSchema> {
        let entries = self.entries.read();
        entries
            .iter()
            .filter(|(id, _)| SchemaFilter::matches(&filter.datasource_ids, id))
            .map(|(id, entry)| {
                let style = self.path_style(entry);
                let tables = entry
                    .schemas
                    .iter()
                    .filter(|(schema, _)| SchemaFilter::matches(&filter.schema_names, schema))
                    .flat_map(|(schema, tables)| {
                        tables
                            .iter()
                            .filter(|(table, _)| SchemaFilter::matches(&filter.table_names, table))
                            .map(move |(table, columns)| SimpleTable {
                                name: table.clone(),
                                path: format_table_path(&entry.namespace, schema, table, style),
                                columns: columns
                                    .iter()
                                    .map(|c| SimpleColumn {
                                        name: c.name.clone(),
                                        column_type: c.column_type.clone(),
                                    })
                                    .collect(),
                            })
                    })
                    .collect();
                (
                    id.clone(),
                    SimpleSchema {
                        datasource_id: id.clone(),
                        provider: entry.provider.clone(),
                        namespace: entry.namespace.clone(),
                        tables,
                    },
                )
            })
            .collect()
    }
}

/// `table` contains the sanitized id as a whole run of `_`-separated tokens.
fn embeds_datasource_id(table: &str, datasource_id: &str) -> bool {
    let (Some(table), Some(id)) = (sanitize(table), sanitize(datasource_id)) else {
        return false;
    };
    let table_tokens: Vec<&str> = table.split('_').collect();
    let id_tokens: Vec<&str> = id.split('_').collect();
    table_tokens
        .windows(id_tokens.len())
        .any(|window| window == id_tokens.as_slice())
}

/// Conversation id → schema cache, bounded by an LRU.
pub struct SchemaCacheRegistry {
    providers: Arc<ProviderRegistry>,
    caches: ConversationMap<SchemaCache>,
}

impl SchemaCacheRegistry {
    pub fn new(providers: Arc<ProviderRegistry>, capacity: usize) -> Self {
        Self {
            providers,
            caches: ConversationMap::new(capacity),
        }
    }

    pub fn get_or_create(&self, conversation_id: &str) -> Arc<SchemaCache> {
        self.caches
            .get_or_create(conversation_id, || SchemaCache::new(Arc::clone(&self.providers)))
    }

    pub fn get(&self, conversation_id: &str) -> Option<Arc<SchemaCache>> {
        self.caches.get(conversation_id)
    }

    /// Drops a conversation's cache entirely.
    pub fn clear(&self, conversation_id: &str) -> bool {
        self.caches.remove(conversation_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<ProviderRegistry> {
        Arc::new(ProviderRegistry::with_builtin_providers().unwrap())
    }

    fn meta(catalog: &str, schema: &str, table: &str, columns: &[(&str, &str)]) -> TableMetadata {
        TableMetadata {
            catalog: catalog.to_string(),
            schema: schema.to_string(),
            table: table.to_string(),
            columns: columns.iter().map(|(n, t)| ColumnDef::new(*n, *t)).collect(),
        }
    }

    #[test]
    fn loads_by_namespace_case_insensitively() {
        let cache = SchemaCache::new(registry());
        let raw = vec![
            meta("Prod", "public", "users", &[("id", "INTEGER")]),
            meta("prod", "public", "orders", &[("id", "INTEGER"), ("total", "DOUBLE")]),
            meta("other", "public", "noise", &[("x", "INTEGER")]),
        ];
        assert_eq!(cache.load_schema_for_datasource("pg1", &raw, "postgresql", "prod"), 2);
        assert!(cache.is_cached("pg1"));

        let tables = cache.get_tables("pg1", Some("public"));
        assert_eq!(tables.len(), 2);
        assert_eq!(
            cache.get_columns("pg1", "public", "orders").unwrap()[1],
            ColumnDef::new("total", "DOUBLE")
        );
        assert!(cache.get_tables("pg1", Some("missing")).is_empty());
    }

    #[test]
    fn table_paths_follow_provider_style_and_are_fixed_points() {
        let cache = SchemaCache::new(registry());
        cache.load_schema_for_datasource(
            "pg1",
            &[meta("prod", "public", "users", &[("id", "INTEGER")])],
            "postgresql",
            "prod",
        );
        cache.load_schema_for_datasource(
            "csv1",
            &[meta("people", "main", "people", &[("name", "VARCHAR")])],
            "csv",
            "people",
        );

        let pg = cache.get_table_path("pg1", "public", "users").unwrap();
        assert_eq!(pg, "prod.public.users");
        assert_eq!(cache.get_table_path("pg1", "public", &pg).unwrap(), pg);

        let csv = cache.get_table_path("csv1", "main", "people").unwrap();
        assert_eq!(csv, "people.people");
        assert_eq!(cache.get_table_path("csv1", "main", &csv).unwrap(), csv);

        assert!(cache.has_table_path("PROD.public.users"));
        assert!(cache.has_table_path("people.people"));
        assert!(!cache.has_table_path("people.main.people"));
        assert!(cache.get_table_path("unknown", "main", "t").is_none());
    }

    #[test]
    fn id_heuristic_requires_token_match_and_unclaimed_catalog() {
        let cache = SchemaCache::new(registry());
        cache.load_schema_for_datasource(
            "ds_12",
            &[meta("sales", "main", "orders", &[("id", "INTEGER")])],
            "csv",
            "sales",
        );

        let raw = vec![
            meta("memory", "main", "upload_ds_1_data", &[("a", "INTEGER")]),
            meta("memory", "main", "upload_ds_12_data", &[("b", "INTEGER")]),
            meta("sales", "main", "mirror_ds_1", &[("c", "INTEGER")]),
        ];
        assert_eq!(cache.load_schema_for_datasource("ds-1", &raw, "csv", "uploads"), 1);
        assert_eq!(
            cache.get_tables("ds-1", None),
            vec![("main".to_string(), "upload_ds_1_data".to_string())]
        );
    }

    #[test]
    fn id_heuristic_is_direct_ingestion_only() {
        let cache = SchemaCache::new(registry());
        let raw = vec![meta("memory", "main", "t_pg1", &[("a", "INTEGER")])];
        assert_eq!(cache.load_schema_for_datasource("pg1", &raw, "postgresql", "prod"), 0);
        // Still cached, with no tables
        assert!(cache.is_cached("pg1"));
    }

    #[test]
    fn invalidate_and_clear() {
        let cache = SchemaCache::new(registry());
        cache.load_schema_for_datasource("a", &[], "csv", "a");
        cache.load_schema_for_datasource("b", &[], "csv", "b");
        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        assert_eq!(cache.datasource_ids(), vec!["b"]);
        cache.clear();
        assert!(!cache.is_cached("b"));
    }

    #[test]
    fn simple_schemas_are_filtered() {
        let cache = SchemaCache::new(registry());
        cache.load_schema_for_datasource(
            "pg1",
            &[
                meta("prod", "public", "users", &[("id", "INTEGER")]),
                meta("prod", "billing", "invoices", &[("id", "INTEGER")]),
            ],
            "postgresql",
            "prod",
        );
        cache.load_schema_for_datasource(
            "csv1",
            &[meta("people", "main", "people", &[("name", "VARCHAR")])],
            "csv",
            "people",
        );

        let all = cache.to_simple_schemas(&SchemaFilter::default());
        assert_eq!(all.len(), 2);

        let filtered = cache.to_simple_schemas(&SchemaFilter {
            datasource_ids: Some(vec!["pg1".to_string()]),
            schema_names: Some(vec!["public".to_string()]),
            table_names: None,
        });
        assert_eq!(filtered.len(), 1);
        let pg = &filtered["pg1"];
        assert_eq!(pg.tables.len(), 1);
        assert_eq!(pg.tables[0].path, "prod.public.users");
        assert_eq!(pg.tables[0].columns[0].column_type, "INTEGER");
    }

    #[test]
    fn registry_creates_and_clears_per_conversation() {
        let caches = SchemaCacheRegistry::new(registry(), 8);
        let a = caches.get_or_create("c1");
        a.load_schema_for_datasource("x", &[], "csv", "x");
        assert!(caches.get_or_create("c1").is_cached("x"));
        assert!(!caches.get_or_create("c2").is_cached("x"));
        assert!(caches.clear("c1"));
        assert!(caches.get("c1").is_none());
    }
}
