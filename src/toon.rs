// SPDX-License-Identifier: Apache-2.0

//! TOON rendering of query results for language-model contexts.
//!
//! ```text
//! query: SELECT name, age FROM people.people
//! results[2]{name,age}:
//!   ada,36
//!   "Hopper, Grace",45
//! ```

use serde::Serialize;

use qwery_core::{Row, Value};

/// Renders one value; null and booleans are bare words.
fn escape(value: &str) -> String {
    let quoted_ends = (value.starts_with('"') || value.starts_with('\''))
        && (value.ends_with('"') || value.ends_with('\''));
    let needs_quoting = value.is_empty()
        || value.contains(',')
        || value.contains('\n')
        || value.contains('\r')
        || value.trim() != value
        || quoted_ends;

    if needs_quoting {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        other => escape(&other.to_string()),
    }
}

/// Encodes a query and its rows.
pub fn encode_query_results(sql: &str, columns: &[String], rows: &[Row]) -> String {
    let mut lines = vec![format!("query: {}", escape(sql))];

    if columns.is_empty() || rows.is_empty() {
        lines.push("results[0]:".to_string());
    } else {
        lines.push(format!("results[{}]{{{}}}:", rows.len(), columns.join(",")));
        for row in rows {
            let values: Vec<String> = row.values.iter().map(render_value).collect();
            lines.push(format!("  {}", values.join(",")));
        }
    }
    lines.join("\n")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preview {
    pub text: String,
    /// Rows actually rendered.
    pub row_count: usize,
    pub truncated: bool,
}

/// Encodes at most `limit` rows.
pub fn preview(sql: &str, columns: &[String], rows: &[Row], limit: usize) -> Preview {
    let shown = &rows[..rows.len().min(limit)];
    Preview {
        text: encode_query_results(sql, columns, shown),
        row_count: shown.len(),
        truncated: rows.len() > limit,
    }
}
