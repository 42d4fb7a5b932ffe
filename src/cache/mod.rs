// SPDX-License-Identifier: Apache-2.0

//! Per-conversation caches: discovered schemas and full query results.

pub mod registry;
pub mod results;
pub mod schema;

pub use registry::ConversationMap;
pub use results::{CachedQueryResult, QueryResultCache};
pub use schema::{
    SchemaCache, SchemaCacheRegistry, SchemaFilter, SimpleColumn, SimpleSchema, SimpleTable,
};
