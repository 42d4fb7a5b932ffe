// SPDX-License-Identifier: Apache-2.0

//! Core types for the Qwery catalog: datasource records, universal result
//! types, and the unified error type shared by every layer.

pub mod datasource;
pub mod error;
pub mod types;

pub use datasource::{slugify, ConfigMap, Conversation, Datasource, CONNECTION_URL_KEYS};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use types::{ColumnDef, ColumnInfo, QueryResult, Row, TableMetadata, Value};
