// SPDX-License-Identifier: Apache-2.0

//! Orchestration Service
//!
//! Ties the domain stores, catalog sessions and both caches together for
//! the agent layer. Every operation on a conversation holds that
//! conversation's lock for its whole duration, so overlapping turns of one
//! conversation are serialized while different conversations run freely.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Mutex as TurnLock;

use qwery_core::{Conversation, Datasource, EngineError, EngineResult, TableMetadata};

use crate::attach::Attachment;
use crate::cache::{
    CachedQueryResult, ConversationMap, QueryResultCache, SchemaCache, SchemaCacheRegistry,
    SchemaFilter, SimpleSchema,
};
use crate::config::CatalogConfig;
use crate::engine::{AttachFailure, CatalogSession, EngineFactory, QueryResponse};
use crate::metrics;
use crate::providers::ProviderRegistry;
use crate::sql_refs;
use crate::store::{ConversationRepository, DatasourceRepository};
use crate::toon;

#[derive(Debug, Clone, Default)]
pub struct OrchestrationRequest {
    pub conversation_id: String,
    /// Takes precedence over the conversation's stored list.
    pub datasource_ids: Option<Vec<String>>,
}

impl OrchestrationRequest {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            datasource_ids: None,
        }
    }

    pub fn with_datasources(mut self, ids: Vec<String>) -> Self {
        self.datasource_ids = Some(ids);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrchestrationResult {
    pub conversation: Option<Conversation>,
    pub datasources: Vec<Datasource>,
    pub attachments: Vec<Attachment>,
    pub failures: Vec<AttachFailure>,
    /// At least one datasource is attached and queryable.
    pub catalog_ready: bool,
}

/// What the agent gets back for a cached query: a small TOON preview plus
/// the id under which the full result can be fetched.
#[derive(Debug, Clone, Serialize)]
pub struct QueryHandle {
    pub query_id: String,
    pub row_count: usize,
    pub column_count: usize,
    pub preview: String,
    pub truncated: bool,
}

pub struct Orchestrator {
    config: Arc<CatalogConfig>,
    registry: Arc<ProviderRegistry>,
    datasources: Arc<dyn DatasourceRepository>,
    conversations: Arc<dyn ConversationRepository>,
    engines: Arc<dyn EngineFactory>,
    sessions: ConversationMap<CatalogSession>,
    locks: Mutex<HashMap<String, Arc<TurnLock<()>>>>,
    schemas: SchemaCacheRegistry,
    results: QueryResultCache,
}

impl Orchestrator {
    pub fn new(
        config: CatalogConfig,
        registry: Arc<ProviderRegistry>,
        datasources: Arc<dyn DatasourceRepository>,
        conversations: Arc<dyn ConversationRepository>,
        engines: Arc<dyn EngineFactory>,
    ) -> Self {
        let schemas = SchemaCacheRegistry::new(Arc::clone(&registry), config.schema_cache_capacity);
        let results = QueryResultCache::new(config.result_cache_capacity, config.result_ttl());
        // Sessions live as long as their schema cache entry would
        let sessions = ConversationMap::new(config.schema_cache_capacity);
        Self {
            config: Arc::new(config),
            registry,
            datasources,
            conversations,
            engines,
            sessions,
            locks: Mutex::new(HashMap::new()),
            schemas,
            results,
        }
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn schema_cache(&self, conversation_id: &str) -> Option<Arc<SchemaCache>> {
        self.schemas.get(conversation_id)
    }

    pub fn session(&self, conversation_id: &str) -> Option<Arc<CatalogSession>> {
        self.sessions
            .get(conversation_id)
            .filter(|s| !s.is_closed())
    }

    /// The conversation's turn lock. Locks nobody else references are
    /// dropped once the map outgrows the session capacity.
    fn turn_lock(&self, conversation_id: &str) -> Arc<TurnLock<()>> {
        let mut locks = self.locks.lock();
        let full = locks.len() >= self.config.schema_cache_capacity.max(1);
        if full && !locks.contains_key(conversation_id) {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        Arc::clone(
            locks
                .entry(conversation_id.to_string())
                .or_insert_with(|| Arc::new(TurnLock::new(()))),
        )
    }

    /// Open session for the conversation, replacing a torn-down one.
    async fn session_for(&self, conversation_id: &str) -> EngineResult<Arc<CatalogSession>> {
        if let Some(session) = self.session(conversation_id) {
            return Ok(session);
        }
        if self.sessions.remove(conversation_id).is_some() {
            // The old catalog is gone, so is everything cached about it
            self.schemas.clear(conversation_id);
        }

        let engine = self.engines.open(conversation_id).await?;
        let session = Arc::new(
            CatalogSession::connect(
                engine,
                Arc::clone(&self.registry),
                Arc::clone(&self.config),
                Some(conversation_id.to_string()),
            )
            .await?,
        );
        self.sessions.insert(conversation_id, Arc::clone(&session));
        Ok(session)
    }

    /// The conversation record (if any) and the ids to attach.
    async fn resolve(
        &self,
        request: &OrchestrationRequest,
    ) -> EngineResult<(Option<Conversation>, Vec<String>)> {
        let conversation = self.conversations.get(&request.conversation_id).await?;
        let ids = match (&request.datasource_ids, &conversation) {
            (Some(ids), _) => ids.clone(),
            (None, Some(conversation)) => conversation.datasource_ids.clone(),
            (None, None) => Vec::new(),
        };
        let mut unique = Vec::with_capacity(ids.len());
        for id in ids {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }
        Ok((conversation, unique))
    }

    /// Loads datasource records; unknown ids become failures.
    async fn load_datasources(
        &self,
        ids: &[String],
    ) -> EngineResult<(Vec<Datasource>, Vec<AttachFailure>)> {
        let mut found = Vec::with_capacity(ids.len());
        let mut failures = Vec::new();
        for id in ids {
            match self.datasources.get(id).await? {
                Some(datasource) => found.push(datasource),
                None => {
                    failures.push(AttachFailure::new(id, &EngineError::datasource_not_found(id)))
                }
            }
        }
        Ok((found, failures))
    }

    /// Attaches `datasources` and feeds their schemas into the cache.
    async fn attach_and_cache(
        &self,
        session: &CatalogSession,
        cache: &SchemaCache,
        datasources: &[Datasource],
    ) -> (Vec<Attachment>, Vec<AttachFailure>) {
        let report = session.attach_all(datasources).await;

        // Strategies usually extract columns during attach; only the rest
        // needs a metadata round trip.
        let mut raw: Vec<TableMetadata> = Vec::new();
        let mut incomplete: Vec<String> = Vec::new();
        for attachment in &report.attachments {
            if attachment.has_all_columns() {
                raw.extend(attachment.tables.iter().map(|t| TableMetadata {
                    catalog: attachment.namespace.clone(),
                    schema: t.schema.clone(),
                    table: t.table.clone(),
                    columns: t.columns.clone().unwrap_or_default(),
                }));
            } else {
                incomplete.push(attachment.datasource_id.clone());
            }
        }
        if !incomplete.is_empty() {
            match session.metadata(Some(&incomplete)).await {
                Ok(tables) => raw.extend(tables),
                Err(e) => tracing::warn!(error = %e, "Metadata extraction failed"),
            }
        }

        for attachment in &report.attachments {
            let tables = cache.load_schema_for_datasource(
                &attachment.datasource_id,
                &raw,
                &attachment.provider,
                &attachment.namespace,
            );
            tracing::debug!(datasource_id = %attachment.datasource_id, tables, "Schema cached");
        }
        (report.attachments, report.failures)
    }

    /// Initializes a conversation's catalog: attaches every resolved
    /// datasource and caches their schemas. An unknown conversation yields
    /// an empty result unless datasource ids were given explicitly.
    #[tracing::instrument(skip(self, request), fields(conversation_id = %request.conversation_id))]
    pub async fn orchestrate(
        &self,
        request: &OrchestrationRequest,
    ) -> EngineResult<OrchestrationResult> {
        let lock = self.turn_lock(&request.conversation_id);
        let _turn = lock.lock().await;

        let (conversation, ids) = self.resolve(request).await?;
        if conversation.is_none() {
            tracing::info!("Conversation not found; starting empty");
        }
        if ids.is_empty() {
            return Ok(OrchestrationResult {
                conversation,
                ..OrchestrationResult::default()
            });
        }

        let (datasources, mut failures) = self.load_datasources(&ids).await?;
        let session = self.session_for(&request.conversation_id).await?;
        let cache = self.schemas.get_or_create(&request.conversation_id);
        let (attachments, attach_failures) =
            self.attach_and_cache(&session, &cache, &datasources).await;
        failures.extend(attach_failures);

        Ok(OrchestrationResult {
            conversation,
            datasources,
            catalog_ready: !attachments.is_empty(),
            attachments,
            failures,
        })
    }

    /// The per-turn path. When every resolved datasource is cached and
    /// attached, `prior` is returned as is without touching the engine;
    /// otherwise only the missing datasources are attached and cached.
    #[tracing::instrument(
        skip(self, request, prior),
        fields(conversation_id = %request.conversation_id)
    )]
    pub async fn ensure_attached_and_cached(
        &self,
        request: &OrchestrationRequest,
        prior: &OrchestrationResult,
    ) -> EngineResult<OrchestrationResult> {
        let lock = self.turn_lock(&request.conversation_id);
        let _turn = lock.lock().await;

        let (conversation, ids) = self.resolve(request).await?;
        let cache = self.schemas.get_or_create(&request.conversation_id);
        let session = self.session(&request.conversation_id);

        let missing: Vec<String> = ids
            .iter()
            .filter(|id| {
                !(cache.is_cached(id)
                    && session.as_ref().is_some_and(|s| s.has_datasource(id)))
            })
            .cloned()
            .collect();

        if missing.is_empty() {
            metrics::record_schema_cache(true);
            tracing::debug!(datasources = ids.len(), "Schema cache hit");
            return Ok(prior.clone());
        }
        metrics::record_schema_cache(false);
        tracing::debug!(missing = missing.len(), "Schema cache miss");

        let (datasources, mut failures) = self.load_datasources(&missing).await?;
        let session = self.session_for(&request.conversation_id).await?;
        // session_for may have replaced a torn-down session and its cache
        let cache = self.schemas.get_or_create(&request.conversation_id);
        let (_, attach_failures) = self.attach_and_cache(&session, &cache, &datasources).await;
        failures.extend(attach_failures);

        let mut result = OrchestrationResult {
            conversation: conversation.or_else(|| prior.conversation.clone()),
            datasources: prior
                .datasources
                .iter()
                .filter(|d| ids.contains(&d.id) && !missing.contains(&d.id))
                .cloned()
                .collect(),
            attachments: Vec::new(),
            failures,
            catalog_ready: false,
        };
        result.datasources.extend(datasources);
        result.attachments = session
            .attachments()
            .into_iter()
            .filter(|a| ids.contains(&a.datasource_id))
            .collect();
        result.catalog_ready = !result.attachments.is_empty();
        Ok(result)
    }

    /// Runs read-only SQL in the conversation's catalog.
    ///
    /// A timeout tears the session down; the conversation's schema cache is
    /// cleared with it and the next turn re-attaches from scratch.
    #[tracing::instrument(skip(self, sql))]
    pub async fn query(&self, conversation_id: &str, sql: &str) -> EngineResult<QueryResponse> {
        if let Some(analysis) = sql_refs::analyze(sql) {
            if !analysis.read_only {
                return Err(EngineError::validation("Only read-only statements are allowed"));
            }
        }

        let lock = self.turn_lock(conversation_id);
        let _turn = lock.lock().await;

        let session = self.session_for(conversation_id).await?;
        match session.query(sql).await {
            Err(e @ EngineError::Timeout { .. }) => {
                self.sessions.remove(conversation_id);
                self.schemas.clear(conversation_id);
                Err(e)
            }
            other => other,
        }
    }

    /// Runs a query, caches the full result and returns a preview handle.
    pub async fn query_and_cache(
        &self,
        conversation_id: &str,
        sql: &str,
    ) -> EngineResult<QueryHandle> {
        let response = self.query(conversation_id, sql).await?;
        self.results.sweep_stale(conversation_id);

        let columns = response.column_names();
        let preview = toon::preview(sql, &columns, &response.rows, self.config.preview_rows);
        let row_count = response.stats.row_count;
        let column_count = response.stats.column_count;
        let query_id = self
            .results
            .store(conversation_id, sql, response.columns, response.rows);

        Ok(QueryHandle {
            query_id,
            row_count,
            column_count,
            preview: preview.text,
            truncated: preview.truncated,
        })
    }

    pub fn cached_result(
        &self,
        conversation_id: &str,
        query_id: &str,
    ) -> Option<Arc<CachedQueryResult>> {
        self.results.get(conversation_id, query_id)
    }

    pub fn result_cache(&self) -> &QueryResultCache {
        &self.results
    }

    /// Qualified table paths in `sql` that no cached datasource exposes.
    /// Unparseable SQL yields nothing; the engine will judge it.
    pub fn validate_sql(&self, conversation_id: &str, sql: &str) -> Vec<String> {
        let Some(analysis) = sql_refs::analyze(sql) else {
            return Vec::new();
        };
        let cache = self.schemas.get(conversation_id);
        analysis
            .tables
            .iter()
            .filter(|t| t.is_qualified())
            .map(|t| t.dotted())
            .filter(|path| !cache.as_ref().is_some_and(|c| c.has_table_path(path)))
            .collect()
    }

    pub async fn detach(&self, conversation_id: &str, datasource_id: &str) -> EngineResult<bool> {
        let lock = self.turn_lock(conversation_id);
        let _turn = lock.lock().await;

        if let Some(cache) = self.schemas.get(conversation_id) {
            cache.invalidate(datasource_id);
        }
        match self.session(conversation_id) {
            Some(session) => session.detach(datasource_id).await,
            None => Ok(false),
        }
    }

    pub fn schema_for(
        &self,
        conversation_id: &str,
        filter: &SchemaFilter,
    ) -> BTreeMap<String, SimpleSchema> {
        self.schemas
            .get(conversation_id)
            .map(|cache| cache.to_simple_schemas(filter))
            .unwrap_or_default()
    }

    /// Closes the session and forgets everything about the conversation.
    pub async fn end_conversation(&self, conversation_id: &str) -> EngineResult<()> {
        let lock = self.turn_lock(conversation_id);
        let outcome = {
            let _turn = lock.lock().await;
            self.schemas.clear(conversation_id);
            self.results.clear(conversation_id);
            match self.sessions.remove(conversation_id) {
                Some(session) => session.close().await,
                None => Ok(()),
            }
        };
        {
            // Turns queued on this lock must keep serializing with later ones
            let mut locks = self.locks.lock();
            let idle = locks
                .get(conversation_id)
                .is_some_and(|held| Arc::ptr_eq(held, &lock) && Arc::strong_count(held) <= 2);
            if idle {
                locks.remove(conversation_id);
            }
        }
        tracing::info!(conversation_id, "Conversation ended");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DuckDbEngineFactory;
    use crate::store::{InMemoryConversationStore, InMemoryDatasourceStore};
    use qwery_core::ConfigMap;
    use serde_json::json;

    struct Fixture {
        orchestrator: Orchestrator,
        datasources: Arc<InMemoryDatasourceStore>,
        conversations: Arc<InMemoryConversationStore>,
        _dir: tempfile::TempDir,
        csv: std::path::PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("people.csv");
        std::fs::write(&csv, "name,age\nada,36\ngrace,45\n").unwrap();

        let datasources = Arc::new(InMemoryDatasourceStore::new());
        let conversations = Arc::new(InMemoryConversationStore::new());
        let orchestrator = Orchestrator::new(
            CatalogConfig::default(),
            Arc::new(ProviderRegistry::with_builtin_providers().unwrap()),
            datasources.clone(),
            conversations.clone(),
            Arc::new(DuckDbEngineFactory),
        );
        Fixture {
            orchestrator,
            datasources,
            conversations,
            _dir: dir,
            csv,
        }
    }

    fn csv_datasource(id: &str, path: &std::path::Path) -> Datasource {
        let config: ConfigMap = json!({ "path": path.to_str().unwrap() })
            .as_object()
            .cloned()
            .unwrap();
        Datasource::new(id, "People", "csv", config)
    }

    #[tokio::test]
    async fn unknown_conversation_is_empty_not_an_error() {
        let f = fixture();
        let result = f
            .orchestrator
            .orchestrate(&OrchestrationRequest::new("nobody"))
            .await
            .unwrap();
        assert!(result.conversation.is_none());
        assert!(result.datasources.is_empty());
        assert!(!result.catalog_ready);
    }

    #[tokio::test]
    async fn explicit_ids_override_stored_list() {
        let f = fixture();
        f.datasources.upsert(csv_datasource("d1", &f.csv));
        f.conversations
            .upsert(Conversation::new("c1", vec!["ghost".to_string()]));

        let result = f
            .orchestrator
            .orchestrate(&OrchestrationRequest::new("c1").with_datasources(vec!["d1".to_string()]))
            .await
            .unwrap();
        assert!(result.catalog_ready);
        assert!(result.failures.is_empty());
        assert_eq!(result.attachments[0].namespace, "people");
    }

    #[tokio::test]
    async fn unknown_datasource_is_reported() {
        let f = fixture();
        f.datasources.upsert(csv_datasource("d1", &f.csv));
        f.conversations
            .upsert(Conversation::new("c1", vec!["d1".to_string(), "ghost".to_string()]));

        let result = f
            .orchestrator
            .orchestrate(&OrchestrationRequest::new("c1"))
            .await
            .unwrap();
        assert!(result.catalog_ready);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].datasource_id, "ghost");
    }

    #[tokio::test]
    async fn writes_are_rejected_before_reaching_the_engine() {
        let f = fixture();
        let err = f
            .orchestrator
            .query("c1", "DROP TABLE people.people")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ValidationError { .. }));
        assert!(f.orchestrator.session("c1").is_none());
    }

    #[tokio::test]
    async fn query_and_cache_then_fetch() {
        let f = fixture();
        f.datasources.upsert(csv_datasource("d1", &f.csv));
        f.conversations
            .upsert(Conversation::new("c1", vec!["d1".to_string()]));
        f.orchestrator
            .orchestrate(&OrchestrationRequest::new("c1"))
            .await
            .unwrap();

        let sql = "SELECT name FROM people.people ORDER BY name";
        assert!(f.orchestrator.validate_sql("c1", sql).is_empty());
        assert_eq!(
            f.orchestrator.validate_sql("c1", "SELECT * FROM people.nope"),
            vec!["people.nope".to_string()]
        );
        assert_eq!(
            f.orchestrator.validate_sql(
                "c1",
                "SELECT CASE WHEN EXISTS (SELECT 1 FROM x.t) THEN 'y' END FROM people.people",
            ),
            vec!["x.t".to_string()]
        );

        let handle = f.orchestrator.query_and_cache("c1", sql).await.unwrap();
        assert_eq!(handle.row_count, 2);
        assert!(!handle.truncated);
        assert!(handle.preview.contains("results[2]{name}:"));

        let cached = f.orchestrator.cached_result("c1", &handle.query_id).unwrap();
        assert_eq!(cached.sql, sql);
        assert_eq!(cached.rows.len(), 2);
        assert!(f.orchestrator.cached_result("c2", &handle.query_id).is_none());
    }

    #[tokio::test]
    async fn detach_and_end_conversation_forget_state() {
        let f = fixture();
        f.datasources.upsert(csv_datasource("d1", &f.csv));
        f.conversations
            .upsert(Conversation::new("c1", vec!["d1".to_string()]));
        f.orchestrator
            .orchestrate(&OrchestrationRequest::new("c1"))
            .await
            .unwrap();
        assert_eq!(f.orchestrator.schema_for("c1", &SchemaFilter::default()).len(), 1);

        assert!(f.orchestrator.detach("c1", "d1").await.unwrap());
        assert!(f.orchestrator.schema_for("c1", &SchemaFilter::default()).is_empty());

        f.orchestrator.end_conversation("c1").await.unwrap();
        assert!(f.orchestrator.session("c1").is_none());
        assert!(f.orchestrator.schema_cache("c1").is_none());
    }

    #[tokio::test]
    async fn end_conversation_keeps_a_lock_others_still_hold() {
        let f = fixture();
        let queued = f.orchestrator.turn_lock("c1");
        f.orchestrator.end_conversation("c1").await.unwrap();
        assert!(Arc::ptr_eq(&queued, &f.orchestrator.turn_lock("c1")));

        drop(queued);
        f.orchestrator.end_conversation("c1").await.unwrap();
        assert!(!f.orchestrator.locks.lock().contains_key("c1"));
    }

    #[tokio::test]
    async fn idle_turn_locks_are_pruned() {
        let orchestrator = Orchestrator::new(
            CatalogConfig {
                schema_cache_capacity: 2,
                ..CatalogConfig::default()
            },
            Arc::new(ProviderRegistry::with_builtin_providers().unwrap()),
            Arc::new(InMemoryDatasourceStore::new()),
            Arc::new(InMemoryConversationStore::new()),
            Arc::new(DuckDbEngineFactory),
        );

        let busy = orchestrator.turn_lock("busy");
        for i in 0..10 {
            assert!(!orchestrator.detach(&format!("c{i}"), "d1").await.unwrap());
        }
        let locks = orchestrator.locks.lock();
        assert!(locks.len() <= 2, "{} locks kept", locks.len());
        assert!(Arc::ptr_eq(&busy, &locks["busy"]));
    }
}
