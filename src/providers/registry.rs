// SPDX-License-Identifier: Apache-2.0

//! Provider Registry
//!
//! Static dispatch table mapping a datasource provider identifier to how it
//! is attached: whether it needs an engine extension, the catalog type tag,
//! how its connection string is built, and how its tables are enumerated.

use std::collections::HashMap;

use serde::Serialize;

use qwery_core::{Datasource, EngineError, EngineResult};

use crate::engine::quote_literal;

use super::connection;

/// How fully-qualified table paths are formatted for a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathStyle {
    /// `namespace.table` (direct-ingestion sources)
    TwoPart,
    /// `namespace.schema.table` (foreign databases)
    ThreePart,
}

/// Tabular format read by a direct-ingestion provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestFormat {
    Csv,
    Json,
    Parquet,
}

impl IngestFormat {
    /// The engine's table function that reads this format.
    pub fn reader(&self) -> &'static str {
        match self {
            IngestFormat::Csv => "read_csv_auto",
            IngestFormat::Json => "read_json_auto",
            IngestFormat::Parquet => "read_parquet",
        }
    }

    /// `SELECT * FROM <reader>('<location>')`
    pub fn select_from(&self, location: &str) -> String {
        format!("SELECT * FROM {}({})", self.reader(), quote_literal(location))
    }
}

/// Attachment protocol of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Materialized by reading a file or URL into a table.
    DirectIngestion(IngestFormat),
    /// A queryable database linked in as a whole catalog.
    ForeignLink,
}

type ConnectionBuilder = fn(&Datasource) -> EngineResult<String>;
type TablesQuery = fn(&str) -> String;

/// Everything the attachment strategies need to know about one provider.
pub struct ProviderSpec {
    pub id: &'static str,
    pub aliases: &'static [&'static str],
    pub kind: ProviderKind,
    /// Engine extension to install/load before attaching.
    pub extension: Option<&'static str>,
    /// `TYPE` tag for `ATTACH`; `None` for native engine files.
    pub catalog_type: Option<&'static str>,
    /// Attachment must live in a persistent, conversation-scoped namespace.
    pub requires_persistence: bool,
    pub system_schemas: &'static [&'static str],
    pub system_table_prefixes: &'static [&'static str],
    connection: ConnectionBuilder,
    tables: TablesQuery,
}

impl std::fmt::Debug for ProviderSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSpec")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("extension", &self.extension)
            .field("catalog_type", &self.catalog_type)
            .finish()
    }
}

impl ProviderSpec {
    pub fn needs_extension(&self) -> bool {
        self.extension.is_some()
    }

    /// Builds the connection string (or source location) from the
    /// datasource's opaque config. Fails with `MissingConfig` when a
    /// mandatory key is absent.
    pub fn build_connection_string(&self, datasource: &Datasource) -> EngineResult<String> {
        (self.connection)(datasource)
    }

    /// SQL listing `(table_schema, table_name)` for an attached namespace.
    pub fn tables_query(&self, namespace: &str) -> String {
        (self.tables)(namespace)
    }

    pub fn path_style(&self) -> PathStyle {
        match self.kind {
            ProviderKind::DirectIngestion(_) => PathStyle::TwoPart,
            ProviderKind::ForeignLink => PathStyle::ThreePart,
        }
    }

    pub fn is_direct_ingestion(&self) -> bool {
        matches!(self.kind, ProviderKind::DirectIngestion(_))
    }

    /// System schemas and system-named tables are never exposed.
    pub fn is_system_table(&self, schema: &str, table: &str) -> bool {
        let schema_lower = schema.to_ascii_lowercase();
        let table_lower = table.to_ascii_lowercase();

        self.system_schemas.iter().any(|s| {
            if let Some(prefix) = s.strip_suffix('*') {
                schema_lower.starts_with(prefix)
            } else {
                schema_lower == *s
            }
        }) || self
            .system_table_prefixes
            .iter()
            .any(|p| table_lower.starts_with(p))
    }

    fn validate(&self) -> EngineResult<()> {
        if self.id.trim().is_empty() {
            return Err(EngineError::internal("Provider id cannot be empty"));
        }
        if self.requires_persistence && !self.is_direct_ingestion() {
            return Err(EngineError::internal(format!(
                "Provider '{}': only direct-ingestion providers can require persistence",
                self.id
            )));
        }
        if self.is_direct_ingestion() && self.catalog_type.is_some() {
            return Err(EngineError::internal(format!(
                "Provider '{}': direct-ingestion providers are not attached with a catalog type",
                self.id
            )));
        }
        if let (ProviderKind::ForeignLink, Some(ext), None) =
            (self.kind, self.extension, self.catalog_type)
        {
            return Err(EngineError::internal(format!(
                "Provider '{}' loads extension '{}' but has no catalog type tag",
                self.id, ext
            )));
        }
        Ok(())
    }
}

/// Enumerates user and system tables from the engine's information schema.
pub fn information_schema_tables(namespace: &str) -> String {
    format!(
        "SELECT table_schema, table_name FROM information_schema.tables \
         WHERE table_catalog = {} ORDER BY table_schema, table_name",
        quote_literal(namespace)
    )
}

/// One batched column query across the given namespaces.
pub fn information_schema_columns(namespaces: &[&str]) -> String {
    let list = namespaces
        .iter()
        .map(|ns| quote_literal(ns))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT table_catalog, table_schema, table_name, column_name, data_type \
         FROM information_schema.columns WHERE table_catalog IN ({list}) \
         ORDER BY table_catalog, table_schema, table_name, ordinal_position"
    )
}

const POSTGRES_SYSTEM_SCHEMAS: &[&str] = &[
    "pg_catalog",
    "information_schema",
    "pg_toast",
    "pg_temp_*",
    "pg_toast_temp_*",
];
const MYSQL_SYSTEM_SCHEMAS: &[&str] = &["mysql", "information_schema", "performance_schema", "sys"];
const DUCKDB_SYSTEM_SCHEMAS: &[&str] = &["information_schema", "pg_catalog"];

fn builtin_providers() -> Vec<ProviderSpec> {
    let direct = |id: &'static str,
                  format: IngestFormat,
                  extension: Option<&'static str>,
                  connection: ConnectionBuilder| ProviderSpec {
        id,
        aliases: &[],
        kind: ProviderKind::DirectIngestion(format),
        extension,
        catalog_type: None,
        requires_persistence: false,
        system_schemas: DUCKDB_SYSTEM_SCHEMAS,
        system_table_prefixes: &[],
        connection,
        tables: information_schema_tables,
    };

    vec![
        direct("csv", IngestFormat::Csv, None, connection::file_location),
        direct("json", IngestFormat::Json, None, connection::file_location),
        direct("parquet", IngestFormat::Parquet, None, connection::file_location),
        direct("csv-online", IngestFormat::Csv, Some("httpfs"), connection::url_location),
        direct("json-online", IngestFormat::Json, Some("httpfs"), connection::url_location),
        direct("parquet-online", IngestFormat::Parquet, Some("httpfs"), connection::url_location),
        ProviderSpec {
            requires_persistence: true,
            ..direct(
                "gsheet-csv",
                IngestFormat::Csv,
                Some("httpfs"),
                connection::spreadsheet_export_url,
            )
        },
        ProviderSpec {
            id: "postgresql",
            aliases: &["postgres", "supabase", "neon"],
            kind: ProviderKind::ForeignLink,
            extension: Some("postgres"),
            catalog_type: Some("POSTGRES"),
            requires_persistence: false,
            system_schemas: POSTGRES_SYSTEM_SCHEMAS,
            system_table_prefixes: &["pg_"],
            connection: connection::postgres_connection_string,
            tables: information_schema_tables,
        },
        ProviderSpec {
            id: "mysql",
            aliases: &["mariadb"],
            kind: ProviderKind::ForeignLink,
            extension: Some("mysql"),
            catalog_type: Some("MYSQL"),
            requires_persistence: false,
            system_schemas: MYSQL_SYSTEM_SCHEMAS,
            system_table_prefixes: &[],
            connection: connection::mysql_connection_string,
            tables: information_schema_tables,
        },
        ProviderSpec {
            id: "sqlite",
            aliases: &[],
            kind: ProviderKind::ForeignLink,
            extension: Some("sqlite"),
            catalog_type: Some("SQLITE"),
            requires_persistence: false,
            system_schemas: DUCKDB_SYSTEM_SCHEMAS,
            system_table_prefixes: &["sqlite_"],
            connection: connection::database_file_path,
            tables: information_schema_tables,
        },
        ProviderSpec {
            id: "duckdb",
            aliases: &[],
            kind: ProviderKind::ForeignLink,
            extension: None,
            catalog_type: None,
            requires_persistence: false,
            system_schemas: DUCKDB_SYSTEM_SCHEMAS,
            system_table_prefixes: &[],
            connection: connection::database_file_path,
            tables: information_schema_tables,
        },
    ]
}

/// Registry that holds all supported providers, keyed by id and alias
pub struct ProviderRegistry {
    specs: Vec<ProviderSpec>,
    index: HashMap<String, usize>,
}

impl ProviderRegistry {
    /// Creates a new empty registry
    pub fn new() -> Self {
        Self {
            specs: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Registry with every built-in provider, validated.
    pub fn with_builtin_providers() -> EngineResult<Self> {
        let mut registry = Self::new();
        for spec in builtin_providers() {
            registry.register(spec)?;
        }
        Ok(registry)
    }

    /// Registers a provider under its id and aliases.
    ///
    /// Ill-formed specs and duplicate identifiers are rejected so that a
    /// misconfigured table fails at startup rather than at attach time.
    pub fn register(&mut self, spec: ProviderSpec) -> EngineResult<()> {
        spec.validate()?;

        let keys: Vec<String> = std::iter::once(spec.id)
            .chain(spec.aliases.iter().copied())
            .map(normalize)
            .collect();
        if let Some(taken) = keys.iter().find(|k| self.index.contains_key(*k)) {
            return Err(EngineError::internal(format!(
                "Provider identifier '{taken}' is registered twice"
            )));
        }

        let position = self.specs.len();
        self.specs.push(spec);
        for key in keys {
            self.index.insert(key, position);
        }
        Ok(())
    }

    /// Looks a provider up by id or alias (case-insensitive).
    pub fn lookup(&self, provider: &str) -> EngineResult<&ProviderSpec> {
        self.index
            .get(&normalize(provider))
            .map(|&i| &self.specs[i])
            .ok_or_else(|| EngineError::unsupported_provider(provider, self.supported()))
    }

    /// Sorted canonical ids of all registered providers.
    pub fn supported(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.specs.iter().map(|s| s.id.to_string()).collect();
        ids.sort();
        ids
    }

    /// Path style for a provider; unknown providers format as two-part.
    pub fn path_style(&self, provider: &str) -> PathStyle {
        self.lookup(provider)
            .map(ProviderSpec::path_style)
            .unwrap_or(PathStyle::TwoPart)
    }

    pub fn is_direct_ingestion(&self, provider: &str) -> bool {
        self.lookup(provider)
            .map(ProviderSpec::is_direct_ingestion)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(provider: &str) -> String {
    provider.trim().to_ascii_lowercase()
}
