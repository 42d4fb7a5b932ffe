// SPDX-License-Identifier: Apache-2.0

//! Connection string builders
//!
//! Turns a datasource's opaque config into what the engine needs to attach
//! it: a libpq URI for Postgres, a key/value string for MySQL, a file path
//! for SQLite/DuckDB files, and a path or URL for direct ingestion.
//!
//! Foreign databases accept either a ready-made connection URL (looked up
//! under `CONNECTION_URL_KEYS`) or discrete `host`/`port`/`user`/
//! `password`/`database` fields.

use std::collections::BTreeMap;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

use qwery_core::{Datasource, EngineError, EngineResult};

use super::sheets;

/// Userinfo/path characters that pass through unencoded.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const LOCATION_KEYS: &[&str] = &["path", "url", "file", "file_path", "filePath", "location"];
const SHARE_LINK_KEYS: &[&str] = &["sharedLink", "shared_link", "shareLink", "url", "link"];
const DATABASE_FILE_KEYS: &[&str] =
    &["path", "file", "database", "database_path", "databasePath", "url"];

/// Normalized connection parameters for network databases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub options: BTreeMap<String, String>,
}

impl ConnectionParams {
    /// Parses a connection URL for one of `schemes`.
    pub fn from_url(provider: &str, raw: &str, schemes: &[&str]) -> EngineResult<Self> {
        let url = Url::parse(raw).map_err(|e| {
            EngineError::configuration(format!("Invalid {provider} connection URL: {e}"))
        })?;

        if !schemes.contains(&url.scheme()) {
            return Err(EngineError::configuration(format!(
                "Unsupported URL scheme '{}' for {provider} (expected {})",
                url.scheme(),
                schemes.join(", ")
            )));
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .map(String::from)
            .ok_or_else(|| EngineError::missing_config(provider, "host"))?;

        let user = Some(decode(url.username())?).filter(|u| !u.is_empty());
        let password = url.password().map(decode).transpose()?;
        let database = url
            .path()
            .strip_prefix('/')
            .filter(|db| !db.is_empty())
            .map(decode)
            .transpose()?;
        let options = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        Ok(Self {
            host: Some(host),
            port: url.port(),
            user,
            password,
            database,
            options,
        })
    }

    /// Reads discrete config fields.
    pub fn from_fields(datasource: &Datasource) -> Self {
        let owned = |keys: &[&str]| datasource.config_str(keys).map(String::from);
        let mut options = BTreeMap::new();
        if let Some(mode) = owned(&["sslmode", "ssl_mode", "sslMode"]) {
            options.insert("sslmode".to_string(), mode);
        } else if datasource.config_bool("ssl") == Some(true) {
            options.insert("sslmode".to_string(), "require".to_string());
        }

        Self {
            host: owned(&["host", "hostname", "server"]),
            port: datasource.config_u16(&["port"]),
            user: owned(&["user", "username"]),
            password: owned(&["password"]),
            database: owned(&["database", "dbname", "db"]),
            options,
        }
    }

    /// URL config wins over discrete fields when present.
    pub fn resolve(datasource: &Datasource, schemes: &[&str]) -> EngineResult<Self> {
        match datasource.connection_url() {
            Some(raw) if has_scheme(raw, schemes) => {
                let mut params = Self::from_url(&datasource.provider, raw, schemes)?;
                // Discrete fields may supply what the URL leaves out
                let fields = Self::from_fields(datasource);
                params.password = params.password.or(fields.password);
                params.database = params.database.or(fields.database);
                Ok(params)
            }
            _ => Ok(Self::from_fields(datasource)),
        }
    }

    fn require_host(&self, provider: &str) -> EngineResult<&str> {
        self.host
            .as_deref()
            .ok_or_else(|| EngineError::missing_config(provider, "host"))
    }
}

fn has_scheme(raw: &str, schemes: &[&str]) -> bool {
    raw.split_once("://")
        .map(|(scheme, _)| schemes.contains(&scheme.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn decode(value: &str) -> EngineResult<String> {
    percent_decode_str(value)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| EngineError::configuration("Connection URL contains invalid UTF-8"))
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

/// libpq URI accepted by the postgres extension's `ATTACH`.
pub fn postgres_connection_string(datasource: &Datasource) -> EngineResult<String> {
    let params = ConnectionParams::resolve(datasource, &["postgres", "postgresql"])?;
    let host = params.require_host(&datasource.provider)?;

    let mut uri = String::from("postgresql://");
    if let Some(user) = &params.user {
        uri.push_str(&encode(user));
        if let Some(password) = &params.password {
            uri.push(':');
            uri.push_str(&encode(password));
        }
        uri.push('@');
    }
    uri.push_str(host);
    uri.push(':');
    uri.push_str(&params.port.unwrap_or(5432).to_string());
    if let Some(database) = &params.database {
        uri.push('/');
        uri.push_str(&encode(database));
    }
    if !params.options.is_empty() {
        let query = params
            .options
            .iter()
            .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        uri.push('?');
        uri.push_str(&query);
    }
    Ok(uri)
}

/// Space-separated `key=value` string accepted by the mysql extension.
pub fn mysql_connection_string(datasource: &Datasource) -> EngineResult<String> {
    let params = ConnectionParams::resolve(datasource, &["mysql", "mariadb"])?;
    let host = params.require_host(&datasource.provider)?;

    let mut parts = vec![
        format!("host={host}"),
        format!("port={}", params.port.unwrap_or(3306)),
    ];
    if let Some(user) = &params.user {
        parts.push(format!("user={user}"));
    }
    if let Some(password) = &params.password {
        parts.push(format!("password={password}"));
    }
    if let Some(database) = &params.database {
        parts.push(format!("database={database}"));
    }
    Ok(parts.join(" "))
}

/// Local database file (SQLite or DuckDB); `sqlite://`/`duckdb://`/`file://`
/// prefixes are stripped.
pub fn database_file_path(datasource: &Datasource) -> EngineResult<String> {
    let raw = datasource
        .config_str(DATABASE_FILE_KEYS)
        .ok_or_else(|| EngineError::missing_config(&datasource.provider, "path"))?;

    let path = ["sqlite://", "duckdb://", "file://"]
        .iter()
        .find_map(|prefix| raw.strip_prefix(prefix))
        .unwrap_or(raw);
    if path.is_empty() {
        return Err(EngineError::missing_config(&datasource.provider, "path"));
    }
    Ok(path.to_string())
}

/// Local path or URL of a flat file.
pub fn file_location(datasource: &Datasource) -> EngineResult<String> {
    let raw = datasource
        .config_str(LOCATION_KEYS)
        .ok_or_else(|| EngineError::missing_config(&datasource.provider, "path"))?;
    if raw.contains("://") {
        validate_url(&datasource.provider, raw)?;
    }
    Ok(raw.to_string())
}

/// Remote file; must be an http(s) or s3 URL.
pub fn url_location(datasource: &Datasource) -> EngineResult<String> {
    let raw = datasource
        .config_str(LOCATION_KEYS)
        .ok_or_else(|| EngineError::missing_config(&datasource.provider, "url"))?;
    validate_url(&datasource.provider, raw)?;
    Ok(raw.to_string())
}

/// Spreadsheet share link rewritten to its CSV export URL.
pub fn spreadsheet_export_url(datasource: &Datasource) -> EngineResult<String> {
    let raw = datasource
        .config_str(SHARE_LINK_KEYS)
        .ok_or_else(|| EngineError::missing_config(&datasource.provider, "sharedLink"))?;
    validate_url(&datasource.provider, raw)?;
    sheets::export_url(raw)
}

fn validate_url(provider: &str, raw: &str) -> EngineResult<Url> {
    let url = Url::parse(raw)
        .map_err(|e| EngineError::configuration(format!("Invalid {provider} URL '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" | "s3" | "gs" | "gcs" | "r2" | "az" | "abfss" => Ok(url),
        other => Err(EngineError::configuration(format!(
            "Unsupported URL scheme '{other}' for {provider}"
        ))),
    }
}
