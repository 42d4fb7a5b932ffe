// SPDX-License-Identifier: Apache-2.0

//! Lightweight in-memory counters for attachment, caching and queries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use serde::Serialize;

#[derive(Default)]
struct CatalogMetrics {
    attach_total: AtomicU64,
    attach_failed: AtomicU64,
    schema_cache_hits: AtomicU64,
    schema_cache_misses: AtomicU64,
    queries_total: AtomicU64,
    queries_failed: AtomicU64,
    query_timeouts: AtomicU64,
    query_duration_total_ms: AtomicU64,
    query_duration_max_ms: AtomicU64,
}

static CATALOG_METRICS: OnceLock<CatalogMetrics> = OnceLock::new();

fn metrics() -> &'static CatalogMetrics {
    CATALOG_METRICS.get_or_init(CatalogMetrics::default)
}

pub fn record_attach(success: bool) {
    let metrics = metrics();
    metrics.attach_total.fetch_add(1, Ordering::Relaxed);
    if !success {
        metrics.attach_failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// `hit`: the cheap path was taken and no metadata was pulled.
pub fn record_schema_cache(hit: bool) {
    let metrics = metrics();
    if hit {
        metrics.schema_cache_hits.fetch_add(1, Ordering::Relaxed);
    } else {
        metrics.schema_cache_misses.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn record_query(duration_ms: f64, success: bool) {
    let duration_ms = duration_ms.max(0.0) as u64;
    let metrics = metrics();
    metrics.queries_total.fetch_add(1, Ordering::Relaxed);
    if !success {
        metrics.queries_failed.fetch_add(1, Ordering::Relaxed);
    }
    metrics
        .query_duration_total_ms
        .fetch_add(duration_ms, Ordering::Relaxed);
    metrics
        .query_duration_max_ms
        .fetch_max(duration_ms, Ordering::Relaxed);
}

pub fn record_timeout() {
    metrics().query_timeouts.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogMetricsSnapshot {
    pub attach_total: u64,
    pub attach_failed: u64,
    pub schema_cache_hits: u64,
    pub schema_cache_misses: u64,
    pub queries_total: u64,
    pub queries_failed: u64,
    pub query_timeouts: u64,
    pub query_avg_ms: Option<f64>,
    pub query_max_ms: Option<u64>,
}

pub fn snapshot() -> CatalogMetricsSnapshot {
    let metrics = metrics();
    let queries_total = metrics.queries_total.load(Ordering::Relaxed);
    let duration_total = metrics.query_duration_total_ms.load(Ordering::Relaxed);
    let max_ms = metrics.query_duration_max_ms.load(Ordering::Relaxed);

    CatalogMetricsSnapshot {
        attach_total: metrics.attach_total.load(Ordering::Relaxed),
        attach_failed: metrics.attach_failed.load(Ordering::Relaxed),
        schema_cache_hits: metrics.schema_cache_hits.load(Ordering::Relaxed),
        schema_cache_misses: metrics.schema_cache_misses.load(Ordering::Relaxed),
        queries_total,
        queries_failed: metrics.queries_failed.load(Ordering::Relaxed),
        query_timeouts: metrics.query_timeouts.load(Ordering::Relaxed),
        query_avg_ms: (queries_total > 0).then(|| duration_total as f64 / queries_total as f64),
        query_max_ms: (max_ms > 0).then_some(max_ms),
    }
}
