// SPDX-License-Identifier: Apache-2.0

//! Naming Service
//!
//! Derives SQL-identifier-safe names for catalog objects:
//!
//! - one namespace per datasource, a pure function of the datasource record
//! - a human-meaningful table name for freshly ingested flat files, inferred
//!   from the dominant entity in the column names or from the file name
//!
//! Every name produced here matches `[a-z][a-z0-9_]*`.

use inflector::Inflector;

use qwery_core::{ColumnDef, Datasource};

/// Prefix for names whose first character would not be a letter.
pub const NAME_PREFIX: &str = "ds_";

/// Catalog names the engine reserves for itself.
const RESERVED: &[&str] = &["memory", "system", "temp", "main", "information_schema", "pg_catalog"];

const IRREGULAR_PLURALS: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("datum", "data"),
    ("index", "indices"),
    ("analysis", "analyses"),
];

/// Lowercases and maps every non-alphanumeric run to a single `_`.
/// Returns `None` when nothing usable is left.
pub fn sanitize(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Forces a sanitized name to start with a letter and avoid reserved names.
fn to_identifier(sanitized: String) -> String {
    let starts_with_letter = sanitized
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic())
        .unwrap_or(false);
    if !starts_with_letter || RESERVED.contains(&sanitized.as_str()) {
        format!("{NAME_PREFIX}{sanitized}")
    } else {
        sanitized
    }
}

/// Namespace a datasource is mounted under.
///
/// Uses the display name, falling back to the provider id, then to a fixed
/// token. Deterministic: the same record always yields the same name.
pub fn namespace_name_for(datasource: &Datasource) -> String {
    let base = sanitize(&datasource.name)
        .or_else(|| sanitize(&datasource.provider))
        .unwrap_or_else(|| "datasource".to_string());
    to_identifier(base)
}

/// Short, identifier-safe token derived from a datasource id.
pub fn id_token(datasource_id: &str) -> String {
    let token: String = datasource_id
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(8)
        .collect::<String>()
        .to_ascii_lowercase();
    if token.is_empty() {
        "x".to_string()
    } else {
        token
    }
}

/// Namespace made unique against the names `taken` reports as held.
///
/// Tries `<base>_<id token>` first, then counts up (`<base>_<token>_2`, ...)
/// since distinct ids can share a token.
pub fn disambiguated_namespace(
    base: &str,
    datasource_id: &str,
    taken: impl Fn(&str) -> bool,
) -> String {
    let first = format!("{base}_{}", id_token(datasource_id));
    if !taken(&first) {
        return first;
    }
    (2..)
        .map(|i| format!("{first}_{i}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or(first)
}

/// Input to semantic naming: one freshly extracted table.
#[derive(Debug, Clone, Copy)]
pub struct TableSchemaHint<'a> {
    pub columns: &'a [ColumnDef],
    /// Path or URL the table was read from.
    pub source: Option<&'a str>,
}

/// Proposes a human-meaningful name for an ingested table.
///
/// Tries, in order: the dominant entity among column names (pluralized),
/// the source file stem, then the sanitized `fallback`. A proposal that
/// collides with `existing` falls back to the sanitized `fallback`, and only
/// that gets a numeric suffix when it is taken too.
pub fn semantic_table_name_for(
    schema: &TableSchemaHint<'_>,
    existing: &[String],
    fallback: &str,
) -> String {
    let fallback_name = to_identifier(sanitize(fallback).unwrap_or_else(|| "data".to_string()));
    let candidate = dominant_entity(schema.columns)
        .map(|entity| pluralize(&entity))
        .and_then(|plural| sanitize(&plural))
        .or_else(|| schema.source.and_then(source_stem))
        .map(to_identifier)
        .unwrap_or_else(|| fallback_name.clone());

    let taken = |n: &str| existing.iter().any(|e| e.eq_ignore_ascii_case(n));
    if !taken(&candidate) {
        return candidate;
    }
    if !taken(&fallback_name) {
        return fallback_name;
    }
    (2..)
        .map(|i| format!("{fallback_name}_{i}"))
        .find(|n| !taken(n))
        .unwrap_or(fallback_name)
}

/// The entity most columns are prefixed with (`customer_name`,
/// `customer_email` → `customer`), or the subject of a leading `<x>_id`.
fn dominant_entity(columns: &[ColumnDef]) -> Option<String> {
    let prefixes: Vec<String> = columns
        .iter()
        .map(|c| c.name.to_snake_case())
        .filter_map(|snake| {
            let mut parts = snake.split('_');
            let first = parts.next()?;
            parts.next().map(|_| first.to_string())
        })
        .filter(|p| p.len() > 1 && p.chars().all(|c| c.is_ascii_alphabetic()))
        .collect();

    if let Some(entity) = majority(&prefixes, columns.len()) {
        return Some(entity);
    }

    let first = columns.first()?.name.to_snake_case();
    first
        .strip_suffix("_id")
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphabetic()))
        .map(String::from)
}

fn majority(prefixes: &[String], total: usize) -> Option<String> {
    let mut best: Option<(&String, usize)> = None;
    for prefix in prefixes {
        let count = prefixes.iter().filter(|p| *p == prefix).count();
        if best.map(|(_, c)| count > c).unwrap_or(true) {
            best = Some((prefix, count));
        }
    }
    best.filter(|(_, count)| *count >= 2 && count * 2 > total)
        .map(|(prefix, _)| prefix.clone())
}

fn source_stem(source: &str) -> Option<String> {
    let without_query = source.split(['?', '#']).next().unwrap_or(source);
    let file = without_query.trim_end_matches('/').rsplit(['/', '\\']).next()?;
    let stem = file.split('.').next().unwrap_or(file);
    // Export endpoints carry no useful file name
    if stem.eq_ignore_ascii_case("export") {
        return None;
    }
    sanitize(stem)
}

fn pluralize(word: &str) -> String {
    let lower = word.to_lowercase();
    for (singular, plural) in IRREGULAR_PLURALS {
        if lower == *singular || lower == *plural {
            return plural.to_string();
        }
    }
    lower.to_plural()
}

#[cfg(test)]
mod tests {
    use super::*;
    use qwery_core::ConfigMap;

    fn ds(name: &str, provider: &str) -> Datasource {
        Datasource::new("0f3a-77c1-beef", name, provider, ConfigMap::new())
    }

    fn cols(names: &[&str]) -> Vec<ColumnDef> {
        names
            .iter()
            .map(|n| ColumnDef::new(*n, "VARCHAR"))
            .collect()
    }

    fn is_identifier(name: &str) -> bool {
        let mut chars = name.chars();
        chars.next().map(|c| c.is_ascii_lowercase()).unwrap_or(false)
            && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    }

    #[test]
    fn namespace_sanitizes_display_name() {
        assert_eq!(namespace_name_for(&ds("Sales Data (2024)", "csv")), "sales_data_2024");
        assert_eq!(namespace_name_for(&ds("2024 report", "csv")), "ds_2024_report");
        assert_eq!(namespace_name_for(&ds("!!!", "postgresql")), "postgresql");
        assert_eq!(namespace_name_for(&ds("", "")), "datasource");
        assert_eq!(namespace_name_for(&ds("Main", "duckdb")), "ds_main");
    }

    #[test]
    fn namespace_is_always_an_identifier() {
        for name in ["9lives", "héllo wörld", "a.b.c", "__x__", "  ", "Ünïcode", "drop table;"] {
            let ns = namespace_name_for(&ds(name, "csv"));
            assert!(is_identifier(&ns), "{name:?} -> {ns:?}");
        }
    }

    #[test]
    fn namespace_is_deterministic() {
        let datasource = ds("My Warehouse", "postgresql");
        assert_eq!(namespace_name_for(&datasource), namespace_name_for(&datasource));
    }

    #[test]
    fn disambiguation_uses_id_token() {
        let free = |_: &str| false;
        assert_eq!(disambiguated_namespace("sales", "0f3a-77c1-beef", free), "sales_0f3a77c1");
        assert_eq!(disambiguated_namespace("sales", "---", free), "sales_x");
    }

    #[test]
    fn disambiguation_counts_past_shared_tokens() {
        // datasource-2 and datasource-3 share the token "datasour"
        let mut held = vec!["sales".to_string()];
        for id in ["datasource-2", "datasource-3", "datasource-4"] {
            let name = disambiguated_namespace("sales", id, |n| {
                held.iter().any(|h| h.eq_ignore_ascii_case(n))
            });
            held.push(name);
        }
        assert_eq!(
            held,
            vec!["sales", "sales_datasour", "sales_datasour_2", "sales_datasour_3"]
        );

        let upper = vec!["SALES_DATASOUR".to_string()];
        let name = disambiguated_namespace("sales", "datasource-9", |n| {
            upper.iter().any(|h| h.eq_ignore_ascii_case(n))
        });
        assert_eq!(name, "sales_datasour_2");
    }

    #[test]
    fn semantic_name_from_dominant_entity() {
        let columns = cols(&["customer_id", "customer_name", "customer_email", "created_at"]);
        let hint = TableSchemaHint { columns: &columns, source: Some("/tmp/export_2024.csv") };
        assert_eq!(semantic_table_name_for(&hint, &[], "raw"), "customers");
    }

    #[test]
    fn semantic_name_from_leading_id() {
        let columns = cols(&["person_id", "name", "age"]);
        let hint = TableSchemaHint { columns: &columns, source: None };
        assert_eq!(semantic_table_name_for(&hint, &[], "raw"), "people");
    }

    #[test]
    fn semantic_name_falls_back_to_file_stem() {
        let columns = cols(&["name", "age"]);
        let hint = TableSchemaHint { columns: &columns, source: Some("/tmp/people.csv") };
        assert_eq!(semantic_table_name_for(&hint, &[], "raw"), "people");
    }

    #[test]
    fn semantic_name_falls_back_to_fallback() {
        let columns = cols(&["a", "b"]);
        let hint = TableSchemaHint {
            columns: &columns,
            source: Some("https://docs.google.com/spreadsheets/d/X/export?format=csv&gid=0"),
        };
        assert_eq!(semantic_table_name_for(&hint, &[], "Budget Sheet"), "budget_sheet");
    }

    #[test]
    fn semantic_name_collision_uses_fallback() {
        let columns = cols(&["name", "age"]);
        let hint = TableSchemaHint { columns: &columns, source: Some("people.csv") };
        let existing = vec!["People".to_string()];
        assert_eq!(semantic_table_name_for(&hint, &existing, "Staff List"), "staff_list");
    }

    #[test]
    fn semantic_name_suffixes_only_a_taken_fallback() {
        let columns = cols(&["name", "age"]);
        let hint = TableSchemaHint { columns: &columns, source: Some("people.csv") };
        let existing = vec![
            "people".to_string(),
            "staff".to_string(),
            "staff_2".to_string(),
        ];
        assert_eq!(semantic_table_name_for(&hint, &existing, "staff"), "staff_3");
        assert_eq!(semantic_table_name_for(&hint, &existing, "!!!"), "data");
    }
}
