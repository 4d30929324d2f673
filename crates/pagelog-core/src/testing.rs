//! Scripted document store for unit tests
//!
//! Records every insert and delete, lets the test decide what each
//! subscription receives and when, and can hold inserts until released.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};

use crate::models::{ReadingEntry, ReadingFields};
use crate::store::{
    CollectionPath, Delivery, Document, DocumentStore, Fields, StoreError, StoreResult,
    Subscription,
};

#[derive(Default)]
struct Inner {
    subscribers: Vec<(CollectionPath, mpsc::UnboundedSender<Delivery>)>,
    inserts: Vec<(CollectionPath, Fields)>,
    deletes: Vec<(CollectionPath, String)>,
    gate: Option<Arc<Semaphore>>,
    fail_writes: bool,
    next_id: u64,
}

#[derive(Clone, Default)]
pub(crate) struct ScriptedStore {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push a snapshot to every open subscription on `path`
    pub fn deliver(&self, path: &CollectionPath, documents: Vec<Document>) {
        for (sub_path, tx) in &self.lock().subscribers {
            if sub_path == path {
                let _ = tx.send(Delivery::Snapshot(documents.clone()));
            }
        }
    }

    /// Push an error to every open subscription on `path`
    pub fn fail_subscriptions(&self, path: &CollectionPath, message: &str) {
        for (sub_path, tx) in &self.lock().subscribers {
            if sub_path == path {
                let _ = tx.send(Delivery::Error(StoreError::Remote(message.to_string())));
            }
        }
    }

    /// Subscriptions on `path` whose receiver is still alive
    pub fn open_subscriptions(&self, path: &CollectionPath) -> usize {
        self.lock()
            .subscribers
            .iter()
            .filter(|(p, tx)| p == path && !tx.is_closed())
            .count()
    }

    pub fn inserts(&self) -> Vec<(CollectionPath, Fields)> {
        self.lock().inserts.clone()
    }

    pub fn deletes(&self) -> Vec<(CollectionPath, String)> {
        self.lock().deletes.clone()
    }

    /// Make inserts wait until [`ScriptedStore::release_inserts`]
    pub fn hold_inserts(&self) {
        self.lock().gate = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_inserts(&self) {
        if let Some(gate) = self.lock().gate.take() {
            // Closing wakes every waiter
            gate.close();
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }
}

impl DocumentStore for ScriptedStore {
    fn subscribe(&self, path: &CollectionPath) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push((path.clone(), tx));
        Subscription::detached(rx)
    }

    async fn insert(&self, path: &CollectionPath, fields: Fields) -> StoreResult<String> {
        let gate = {
            let mut inner = self.lock();
            inner.inserts.push((path.clone(), fields));
            inner.gate.clone()
        };

        if let Some(gate) = gate {
            let _permit = gate.acquire().await;
        }

        let mut inner = self.lock();
        if inner.fail_writes {
            return Err(StoreError::Remote("write refused".to_string()));
        }
        inner.next_id += 1;
        Ok(format!("doc-{}", inner.next_id))
    }

    async fn delete_by_id(&self, path: &CollectionPath, id: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.deletes.push((path.clone(), id.to_string()));
        if inner.fail_writes {
            return Err(StoreError::Remote("write refused".to_string()));
        }
        Ok(())
    }
}

/// A store document holding a reading
pub(crate) fn reading_doc(id: &str, pages: u32, timestamp: i64) -> Document {
    Document {
        id: id.to_string(),
        fields: ReadingFields { pages, timestamp }.into_fields(),
    }
}

pub(crate) fn ids(readings: &[ReadingEntry]) -> Vec<&str> {
    readings.iter().map(|r| r.id.as_str()).collect()
}

/// Poll `check` until it holds or a few seconds pass
pub(crate) async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..250 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
