// SPDX-License-Identifier: Apache-2.0

//! Domain records read by the catalog: datasources and conversations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque provider configuration (connection parameters, paths, credentials).
pub type ConfigMap = serde_json::Map<String, serde_json::Value>;

/// Config keys checked, in order, for a ready-made connection URL.
pub const CONNECTION_URL_KEYS: &[&str] = &[
    "connection_url",
    "connectionUrl",
    "connection_string",
    "connectionString",
    "database_url",
    "databaseUrl",
    "url",
    "dsn",
];

/// A named, externally configured source of tabular data
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Datasource {
    pub id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub slug: String,
    pub provider: String,
    #[serde(default)]
    pub config: ConfigMap,
}

impl Datasource {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        provider: impl Into<String>,
        config: ConfigMap,
    ) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            project_id: None,
            slug: slugify(&name),
            name,
            provider: provider.into(),
            config,
        }
    }

    /// First non-empty string value among `keys`.
    pub fn config_str(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| {
            self.config
                .get(*key)
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
    }

    /// Integer-or-string numeric config value (ports are often stored as text).
    pub fn config_u16(&self, keys: &[&str]) -> Option<u16> {
        keys.iter().find_map(|key| match self.config.get(*key)? {
            serde_json::Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }

    pub fn config_bool(&self, key: &str) -> Option<bool> {
        match self.config.get(key)? {
            serde_json::Value::Bool(b) => Some(*b),
            serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// A ready-made connection URL, if the config carries one.
    pub fn connection_url(&self) -> Option<&str> {
        self.config_str(CONNECTION_URL_KEYS)
    }
}

impl fmt::Debug for Datasource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Config values may hold credentials; only keys are printed.
        let keys: Vec<&String> = self.config.keys().collect();
        f.debug_struct("Datasource")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("provider", &self.provider)
            .field("config_keys", &keys)
            .finish()
    }
}

/// A conversation and the datasources it works against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub datasource_ids: Vec<String>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, datasource_ids: Vec<String>) -> Self {
        Self {
            id: id.into(),
            project_id: None,
            datasource_ids,
        }
    }
}

/// Lowercase slug: non-alphanumerics become `-`, runs collapse.
pub fn slugify(value: &str) -> String {
    let normalized: String = value
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    let slug = normalized
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        value.to_lowercase()
    } else {
        slug
    }
}
