// SPDX-License-Identifier: Apache-2.0

//! Catalog configuration
//!
//! Defaults suit an interactive agent; each knob can be overridden through a
//! `QWERY_*` environment variable. Unparseable values fall back to the
//! default with a warning.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_ATTACH_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CACHE_CAPACITY: usize = 256;
pub const DEFAULT_RESULT_TTL_SECS: u64 = 3_600;
pub const DEFAULT_PREVIEW_ROWS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Root under which each conversation gets `<conversation_id>/<namespace>.duckdb`.
    /// `None` keeps every catalog in memory.
    pub workspace: Option<PathBuf>,
    pub attach_timeout_ms: u64,
    pub query_timeout_ms: u64,
    /// Conversations kept in the schema cache registry.
    pub schema_cache_capacity: usize,
    /// Conversations kept in the query result cache.
    pub result_cache_capacity: usize,
    pub result_ttl_secs: u64,
    pub preview_rows: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            workspace: None,
            attach_timeout_ms: DEFAULT_ATTACH_TIMEOUT_MS,
            query_timeout_ms: DEFAULT_QUERY_TIMEOUT_MS,
            schema_cache_capacity: DEFAULT_CACHE_CAPACITY,
            result_cache_capacity: DEFAULT_CACHE_CAPACITY,
            result_ttl_secs: DEFAULT_RESULT_TTL_SECS,
            preview_rows: DEFAULT_PREVIEW_ROWS,
        }
    }
}

impl CatalogConfig {
    /// Reads overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let workspace = lookup("QWERY_WORKSPACE")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        Self {
            workspace,
            attach_timeout_ms: parse_or(
                &lookup,
                "QWERY_ATTACH_TIMEOUT_MS",
                defaults.attach_timeout_ms,
            ),
            query_timeout_ms: parse_or(
                &lookup,
                "QWERY_QUERY_TIMEOUT_MS",
                defaults.query_timeout_ms,
            ),
            schema_cache_capacity: parse_or(
                &lookup,
                "QWERY_SCHEMA_CACHE_CAPACITY",
                defaults.schema_cache_capacity,
            ),
            result_cache_capacity: parse_or(
                &lookup,
                "QWERY_RESULT_CACHE_CAPACITY",
                defaults.result_cache_capacity,
            ),
            result_ttl_secs: parse_or(&lookup, "QWERY_RESULT_TTL_SECS", defaults.result_ttl_secs),
            preview_rows: parse_or(&lookup, "QWERY_PREVIEW_ROWS", defaults.preview_rows),
        }
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn attach_timeout(&self) -> Duration {
        Duration::from_millis(self.attach_timeout_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }
}

/// Zero is rejected too: a zero timeout or capacity is never intended.
fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + PartialEq + Default + Copy,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) if value != T::default() => value,
            _ => {
                tracing::warn!(key, value = %raw, "Ignoring invalid configuration value");
                default
            }
        },
    }
}
