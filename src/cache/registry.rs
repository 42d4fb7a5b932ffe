// SPDX-License-Identifier: Apache-2.0

//! Conversation-keyed registry bounded by an LRU.
//!
//! The map lock is only held to look an entry up; each entry carries its own
//! synchronization, so unrelated conversations never contend on it for long.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

pub struct ConversationMap<T> {
    entries: Mutex<LruCache<String, Arc<T>>>,
}

impl<T> ConversationMap<T> {
    /// A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Existing entry (marked recently used) or a freshly created one.
    /// Inserting past capacity evicts the least recently used conversation.
    pub fn get_or_create<F>(&self, conversation_id: &str, create: F) -> Arc<T>
    where
        F: FnOnce() -> T,
    {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(conversation_id) {
            return Arc::clone(existing);
        }
        let created = Arc::new(create());
        let pushed = entries.push(conversation_id.to_string(), Arc::clone(&created));
        if let Some((evicted, _)) = pushed {
            if evicted != conversation_id {
                tracing::debug!(
                    conversation_id = %evicted,
                    "Evicted least recently used conversation"
                );
            }
        }
        created
    }

    pub fn get(&self, conversation_id: &str) -> Option<Arc<T>> {
        self.entries.lock().get(conversation_id).cloned()
    }

    pub fn insert(&self, conversation_id: &str, value: Arc<T>) {
        self.entries.lock().put(conversation_id.to_string(), value);
    }

    pub fn remove(&self, conversation_id: &str) -> Option<Arc<T>> {
        self.entries.lock().pop(conversation_id)
    }

    pub fn contains(&self, conversation_id: &str) -> bool {
        self.entries.lock().contains(conversation_id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
