// SPDX-License-Identifier: Apache-2.0

//! Query Result Cache
//!
//! Full result sets kept per conversation so a tool can hand back a short
//! preview plus a query id, and a follow-up call can fetch everything.
//!
//! Stale entries are not removed by a timer: `sweep_stale` is called
//! opportunistically (the orchestrator does so on every cached query).

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use qwery_core::{ColumnInfo, Row};

use super::registry::ConversationMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedQueryResult {
    pub query_id: String,
    pub sql: String,
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Row>,
    pub created_at: DateTime<Utc>,
}

type ConversationResults = Mutex<HashMap<String, Arc<CachedQueryResult>>>;

pub struct QueryResultCache {
    conversations: ConversationMap<ConversationResults>,
    ttl: chrono::Duration,
}

impl QueryResultCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            conversations: ConversationMap::new(capacity),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Stores a result and returns its query id.
    pub fn store(
        &self,
        conversation_id: &str,
        sql: &str,
        columns: Vec<ColumnInfo>,
        rows: Vec<Row>,
    ) -> String {
        self.store_at(conversation_id, sql, columns, rows, Utc::now())
    }

    /// Like [`store`](Self::store) with an explicit creation time.
    pub fn store_at(
        &self,
        conversation_id: &str,
        sql: &str,
        columns: Vec<ColumnInfo>,
        rows: Vec<Row>,
        created_at: DateTime<Utc>,
    ) -> String {
        let results = self
            .conversations
            .get_or_create(conversation_id, || Mutex::new(HashMap::new()));
        let mut results = results.lock();

        let base = derive_query_id(sql, created_at);
        let mut query_id = base.clone();
        let mut bump = 1;
        while results.contains_key(&query_id) {
            query_id = format!("{base}_{bump}");
            bump += 1;
        }

        results.insert(
            query_id.clone(),
            Arc::new(CachedQueryResult {
                query_id: query_id.clone(),
                sql: sql.to_string(),
                columns,
                rows,
                created_at,
            }),
        );
        tracing::debug!(conversation_id, query_id = %query_id, "Result cached");
        query_id
    }

    pub fn get(&self, conversation_id: &str, query_id: &str) -> Option<Arc<CachedQueryResult>> {
        self.conversations
            .get(conversation_id)?
            .lock()
            .get(query_id)
            .cloned()
    }

    /// Removes entries older than the TTL. Returns how many were removed.
    pub fn sweep_stale(&self, conversation_id: &str) -> usize {
        self.sweep_stale_at(conversation_id, Utc::now())
    }

    pub fn sweep_stale_at(&self, conversation_id: &str, now: DateTime<Utc>) -> usize {
        let Some(results) = self.conversations.get(conversation_id) else {
            return 0;
        };
        let mut results = results.lock();
        let before = results.len();
        results.retain(|_, entry| now.signed_duration_since(entry.created_at) <= self.ttl);
        let removed = before - results.len();
        if removed > 0 {
            tracing::debug!(conversation_id, removed, "Swept stale results");
        }
        removed
    }

    pub fn remove(&self, conversation_id: &str, query_id: &str) -> bool {
        self.conversations
            .get(conversation_id)
            .map(|results| results.lock().remove(query_id).is_some())
            .unwrap_or(false)
    }

    /// Drops every result of a conversation.
    pub fn clear(&self, conversation_id: &str) -> bool {
        self.conversations.remove(conversation_id).is_some()
    }

    pub fn len(&self, conversation_id: &str) -> usize {
        self.conversations
            .get(conversation_id)
            .map(|results| results.lock().len())
            .unwrap_or(0)
    }
}

/// `q_<sql hash>_<millis>`: cheap, deterministic, no randomness needed.
fn derive_query_id(sql: &str, at: DateTime<Utc>) -> String {
    let mut hasher = DefaultHasher::new();
    sql.hash(&mut hasher);
    format!("q_{:016x}_{}", hasher.finish(), at.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use qwery_core::Value;

    fn rows(n: i64) -> Vec<Row> {
        (0..n).map(|i| Row::new(vec![Value::Int(i)])).collect()
    }

    fn columns() -> Vec<ColumnInfo> {
        vec![ColumnInfo::new("n", "BIGINT")]
    }

    #[test]
    fn get_returns_what_was_stored() {
        let cache = QueryResultCache::new(8, Duration::from_secs(3600));
        let id = cache.store("c1", "SELECT n FROM t", columns(), rows(3));

        let cached = cache.get("c1", &id).unwrap();
        assert_eq!(cached.sql, "SELECT n FROM t");
        assert_eq!(cached.rows, rows(3));
        assert_eq!(cached.columns, columns());

        assert!(cache.get("c2", &id).is_none());
        assert!(cache.get("c1", "q_unknown").is_none());
    }

    #[test]
    fn same_sql_same_instant_gets_distinct_ids() {
        let cache = QueryResultCache::new(8, Duration::from_secs(3600));
        let now = Utc::now();
        let a = cache.store_at("c1", "SELECT 1", columns(), rows(1), now);
        let b = cache.store_at("c1", "SELECT 1", columns(), rows(2), now);
        assert_ne!(a, b);
        assert!(b.starts_with(&a));
        assert_eq!(cache.len("c1"), 2);
    }

    #[test]
    fn query_ids_derive_from_sql() {
        let at = Utc::now();
        assert_eq!(derive_query_id("SELECT 1", at), derive_query_id("SELECT 1", at));
        assert_ne!(derive_query_id("SELECT 1", at), derive_query_id("SELECT 2", at));
    }

    #[test]
    fn sweep_removes_only_expired() {
        let cache = QueryResultCache::new(8, Duration::from_secs(3600));
        let now = Utc::now();
        let an_hour_ago = now - chrono::Duration::minutes(90);
        let recently = now - chrono::Duration::minutes(10);
        let old = cache.store_at("c1", "SELECT 1", columns(), rows(1), an_hour_ago);
        let fresh = cache.store_at("c1", "SELECT 2", columns(), rows(1), recently);

        assert_eq!(cache.sweep_stale_at("c1", now), 1);
        assert!(cache.get("c1", &old).is_none());
        assert!(cache.get("c1", &fresh).is_some());
        assert_eq!(cache.sweep_stale_at("unknown", now), 0);
    }

    #[test]
    fn remove_and_clear() {
        let cache = QueryResultCache::new(8, Duration::from_secs(3600));
        let id = cache.store("c1", "SELECT 1", columns(), rows(1));
        assert!(cache.remove("c1", &id));
        assert!(!cache.remove("c1", &id));
        cache.store("c1", "SELECT 1", columns(), rows(1));
        assert!(cache.clear("c1"));
        assert_eq!(cache.len("c1"), 0);
    }
}
