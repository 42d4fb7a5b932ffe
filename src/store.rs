// SPDX-License-Identifier: Apache-2.0

//! Domain-layer boundary: where datasource and conversation records come
//! from. The in-memory stores back tests and single-process deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use qwery_core::{slugify, Conversation, Datasource, EngineResult};

#[async_trait]
pub trait DatasourceRepository: Send + Sync {
    async fn get(&self, datasource_id: &str) -> EngineResult<Option<Datasource>>;

    async fn list(&self, project_id: &str) -> EngineResult<Vec<Datasource>>;

    /// Looks a datasource up by id or slug within a project.
    async fn get_for_project(
        &self,
        project_id: &str,
        identifier: &str,
    ) -> EngineResult<Option<Datasource>>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn get(&self, conversation_id: &str) -> EngineResult<Option<Conversation>>;
}

#[derive(Default)]
pub struct InMemoryDatasourceStore {
    items: RwLock<HashMap<String, Datasource>>,
}

impl InMemoryDatasourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or updates a record. An empty id gets a fresh UUID, an
    /// empty slug is derived from the name. Updates keep an existing slug
    /// unless a new one is given.
    pub fn upsert(&self, mut datasource: Datasource) -> Datasource {
        if datasource.id.trim().is_empty() {
            datasource.id = uuid::Uuid::new_v4().to_string();
        }

        let mut items = self.items.write();
        if datasource.slug.is_empty() {
            datasource.slug = items
                .get(&datasource.id)
                .map(|existing| existing.slug.clone())
                .unwrap_or_else(|| slugify(&datasource.name));
        }
        items.insert(datasource.id.clone(), datasource.clone());
        datasource
    }

    /// Deletes a record if it belongs to `project_id`.
    pub fn delete(&self, project_id: &str, datasource_id: &str) -> bool {
        let mut items = self.items.write();
        match items.get(datasource_id) {
            Some(record) if record.project_id.as_deref() == Some(project_id) => {
                items.remove(datasource_id);
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl DatasourceRepository for InMemoryDatasourceStore {
    async fn get(&self, datasource_id: &str) -> EngineResult<Option<Datasource>> {
        Ok(self.items.read().get(datasource_id).cloned())
    }

    async fn list(&self, project_id: &str) -> EngineResult<Vec<Datasource>> {
        let mut records: Vec<Datasource> = self
            .items
            .read()
            .values()
            .filter(|d| d.project_id.as_deref() == Some(project_id))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    async fn get_for_project(
        &self,
        project_id: &str,
        identifier: &str,
    ) -> EngineResult<Option<Datasource>> {
        Ok(self
            .items
            .read()
            .values()
            .find(|d| {
                d.project_id.as_deref() == Some(project_id)
                    && (d.id == identifier || d.slug == identifier)
            })
            .cloned())
    }
}

#[derive(Default)]
pub struct InMemoryConversationStore {
    items: RwLock<HashMap<String, Conversation>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, conversation: Conversation) {
        self.items
            .write()
            .insert(conversation.id.clone(), conversation);
    }

    /// Replaces the conversation's datasource list; `false` if unknown.
    pub fn set_datasources(&self, conversation_id: &str, datasource_ids: Vec<String>) -> bool {
        match self.items.write().get_mut(conversation_id) {
            Some(conversation) => {
                conversation.datasource_ids = datasource_ids;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversationStore {
    async fn get(&self, conversation_id: &str) -> EngineResult<Option<Conversation>> {
        Ok(self.items.read().get(conversation_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qwery_core::ConfigMap;

    fn record(id: &str, project: &str, name: &str) -> Datasource {
        let mut ds = Datasource::new(id, name, "csv", ConfigMap::new());
        ds.project_id = Some(project.to_string());
        ds.slug = String::new();
        ds
    }

    #[tokio::test]
    async fn upsert_derives_slug_and_id() {
        let store = InMemoryDatasourceStore::new();
        let saved = store.upsert(record("", "p1", "Sales Data"));
        assert!(!saved.id.is_empty());
        assert_eq!(saved.slug, "sales-data");

        let found = store.get_for_project("p1", "sales-data").await.unwrap().unwrap();
        assert_eq!(found.id, saved.id);
        assert!(store.get_for_project("p2", "sales-data").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_keeps_slug() {
        let store = InMemoryDatasourceStore::new();
        store.upsert(record("d1", "p1", "Sales"));
        store.upsert(record("d1", "p1", "Renamed"));
        let found = store.get("d1").await.unwrap().unwrap();
        assert_eq!(found.name, "Renamed");
        assert_eq!(found.slug, "sales");
    }

    #[tokio::test]
    async fn list_and_delete_are_project_scoped() {
        let store = InMemoryDatasourceStore::new();
        store.upsert(record("d1", "p1", "B"));
        store.upsert(record("d2", "p1", "A"));
        store.upsert(record("d3", "p2", "C"));

        let names: Vec<String> = store
            .list("p1")
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["A", "B"]);

        assert!(!store.delete("p2", "d1"));
        assert!(store.delete("p1", "d1"));
        assert!(store.get("d1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn conversation_datasources_can_be_replaced() {
        let store = InMemoryConversationStore::new();
        store.upsert(Conversation::new("c1", vec!["d1".to_string()]));
        assert!(store.set_datasources("c1", vec!["d2".to_string(), "d3".to_string()]));
        assert!(!store.set_datasources("missing", Vec::new()));
        let conversation = ConversationRepository::get(&store, "c1").await.unwrap().unwrap();
        assert_eq!(conversation.datasource_ids, vec!["d2", "d3"]);
    }
}
