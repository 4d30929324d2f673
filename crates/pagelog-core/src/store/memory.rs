//! In-memory document store
//!
//! Volatile store used for tests, demos and `pagelog --memory`. Documents
//! keep their insertion order, which is not the order readers
//! should display.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{
    CollectionPath, Document, DocumentStore, Fields, StoreResult, SubscriberHub, Subscription,
};
use crate::models::random_id;

/// Volatile in-process document store
#[derive(Clone, Default)]
pub struct MemoryStore {
    collections: Arc<Mutex<HashMap<CollectionPath, Vec<Document>>>>,
    hub: SubscriberHub,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current documents of a collection
    pub fn documents(&self, path: &CollectionPath) -> Vec<Document> {
        self.lock().get(path).cloned().unwrap_or_default()
    }

    /// Insert a document with a caller-chosen id, replacing any existing one
    pub fn put(&self, path: &CollectionPath, id: &str, fields: Fields) {
        let mut collections = self.lock();
        let docs = collections.entry(path.clone()).or_default();
        docs.retain(|doc| doc.id != id);
        docs.push(Document {
            id: id.to_string(),
            fields,
        });
        self.hub.publish(path, docs);
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CollectionPath, Vec<Document>>> {
        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl DocumentStore for MemoryStore {
    fn subscribe(&self, path: &CollectionPath) -> Subscription {
        let collections = self.lock();
        let snapshot = collections.get(path).cloned().unwrap_or_default();
        self.hub.register(path, Ok(snapshot))
    }

    async fn insert(&self, path: &CollectionPath, fields: Fields) -> StoreResult<String> {
        let id = random_id();
        let mut collections = self.lock();
        let docs = collections.entry(path.clone()).or_default();
        docs.push(Document {
            id: id.clone(),
            fields,
        });
        self.hub.publish(path, docs);
        Ok(id)
    }

    async fn delete_by_id(&self, path: &CollectionPath, id: &str) -> StoreResult<()> {
        let mut collections = self.lock();
        let Some(docs) = collections.get_mut(path) else {
            return Ok(());
        };

        let before = docs.len();
        docs.retain(|doc| doc.id != id);
        if docs.len() != before {
            self.hub.publish(path, docs);
        }
        Ok(())
    }
}
