// SPDX-License-Identifier: Apache-2.0

//! Spreadsheet share links
//!
//! A human share URL such as
//! `https://docs.google.com/spreadsheets/d/<ID>/edit#gid=<GID>` is rewritten
//! into its CSV export form before ingestion.

use std::sync::OnceLock;

use regex::Regex;

use qwery_core::{EngineError, EngineResult};

fn compiled(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> EngineResult<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok())
        .as_ref()
        .ok_or_else(|| EngineError::internal(format!("Invalid pattern: {pattern}")))
}

fn document_pattern() -> EngineResult<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&PATTERN, r"^(https?://[^/]+/spreadsheets/d/)([A-Za-z0-9_-]+)")
}

fn gid_pattern() -> EngineResult<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&PATTERN, r"[#?&]gid=([0-9]+)")
}

/// Rewrites a spreadsheet share link into its CSV export URL.
///
/// Links that already point at an export are returned unchanged. The sheet
/// tab (`gid`) defaults to the first one.
pub fn export_url(share_link: &str) -> EngineResult<String> {
    let link = share_link.trim();
    let captures = document_pattern()?.captures(link).ok_or_else(|| {
        EngineError::configuration(format!("Not a spreadsheet share link: {link}"))
    })?;

    if link.contains("/export?") && link.contains("format=csv") {
        return Ok(link.to_string());
    }

    let gid = gid_pattern()?
        .captures(link)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or("0");

    Ok(format!(
        "{}{}/export?format=csv&gid={}",
        &captures[1], &captures[2], gid
    ))
}
