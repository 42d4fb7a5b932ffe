// SPDX-License-Identifier: Apache-2.0

//! Normalized error types for the Qwery catalog
//!
//! Engine-, provider- and cache-level failures are all mapped to these
//! unified error types so that batch attachment can report partial
//! success with a consistent shape.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all catalog operations
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum EngineError {
    #[error("Missing required field '{field}' for provider '{provider}'")]
    MissingConfig { provider: String, field: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Unsupported provider '{provider}'. Supported providers: {}", .supported.join(", "))]
    UnsupportedProvider {
        provider: String,
        supported: Vec<String>,
    },

    #[error("Datasource not found: {datasource_id}")]
    DatasourceNotFound { datasource_id: String },

    #[error("Introspection failed: {message}")]
    Introspection { message: String },

    #[error("Query syntax error: {message}")]
    SyntaxError { message: String },

    #[error("Query execution error: {message}")]
    ExecutionError { message: String },

    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Feature not supported: {message}")]
    NotSupported { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Coarse failure category, used when reporting per-datasource failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Connectivity,
    Introspection,
    Unsupported,
    Execution,
    Internal,
}

impl EngineError {
    pub fn missing_config(provider: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingConfig {
            provider: provider.into(),
            field: field.into(),
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration { message: msg.into() }
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed { message: msg.into() }
    }

    pub fn unsupported_provider(provider: impl Into<String>, supported: Vec<String>) -> Self {
        Self::UnsupportedProvider {
            provider: provider.into(),
            supported,
        }
    }

    pub fn datasource_not_found(id: impl Into<String>) -> Self {
        Self::DatasourceNotFound {
            datasource_id: id.into(),
        }
    }

    pub fn introspection(msg: impl Into<String>) -> Self {
        Self::Introspection { message: msg.into() }
    }

    pub fn syntax_error(msg: impl Into<String>) -> Self {
        Self::SyntaxError { message: msg.into() }
    }

    pub fn execution_error(msg: impl Into<String>) -> Self {
        Self::ExecutionError { message: msg.into() }
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported { message: msg.into() }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError { message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal { message: msg.into() }
    }

    /// Maps the error onto the category reported back to the caller.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingConfig { .. }
            | Self::Configuration { .. }
            | Self::ValidationError { .. } => ErrorKind::Configuration,
            Self::ConnectionFailed { .. } | Self::Timeout { .. } | Self::Cancelled => {
                ErrorKind::Connectivity
            }
            Self::Introspection { .. } => ErrorKind::Introspection,
            Self::UnsupportedProvider { .. } | Self::NotSupported { .. } => ErrorKind::Unsupported,
            Self::DatasourceNotFound { .. }
            | Self::SyntaxError { .. }
            | Self::ExecutionError { .. } => ErrorKind::Execution,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Engine responses such as "database already attached" or "table
    /// already exists", which re-attachment treats as success.
    pub fn is_already_exists(&self) -> bool {
        let message = match self {
            Self::ExecutionError { message }
            | Self::ConnectionFailed { message }
            | Self::Internal { message } => message,
            _ => return false,
        };
        let lower = message.to_ascii_lowercase();
        lower.contains("already attached") || lower.contains("already exists")
    }
}

/// Result type alias for catalog operations
pub type EngineResult<T> = Result<T, EngineError>;
