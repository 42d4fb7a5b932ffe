// Catalog Engine Module
// Boundary with the embedded analytical engine and the per-conversation catalog session

pub mod drivers;
pub mod session;
pub mod traits;

pub use drivers::duckdb::{DuckDbEngine, DuckDbEngineFactory};
pub use session::{AttachFailure, AttachReport, CatalogSession, QueryResponse, QueryStats};
pub use traits::{EngineFactory, SqlEngine};

/// Quotes an identifier for the catalog engine (`"name"`, embedded quotes doubled).
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes a string literal (`'value'`, embedded quotes doubled).
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
