//! Sync projection
//!
//! Live, ordered mirror of one user's reading collection. Every delivery
//! from the store carries the full collection, which replaces the local list
//! wholesale before it is sorted newest first and totalled.
//!
//! The projection task is the only writer of the list. Commands never touch
//! it; their effects come back through the subscription.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::aggregate::total_pages;
use crate::models::ReadingEntry;
use crate::store::{CollectionPath, Delivery, Document, DocumentStore, Subscription};

/// What the projection currently shows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectionState {
    /// Readings, most recent first
    pub readings: Vec<ReadingEntry>,
    /// Sum of pages over `readings`
    pub total_pages: u64,
    /// True until the first delivery of the active subscription
    pub is_loading: bool,
    /// Message of the error that stopped the subscription, if any
    pub last_error: Option<String>,
}

impl ProjectionState {
    fn loading() -> Self {
        Self {
            is_loading: true,
            ..Self::default()
        }
    }

    /// Replace the list with a delivered snapshot
    ///
    /// Documents that are not valid readings are skipped.
    pub fn apply_snapshot(&mut self, documents: Vec<Document>) {
        let mut readings: Vec<ReadingEntry> = documents
            .iter()
            .filter_map(|doc| match ReadingEntry::from_document(doc) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping document: {}", e);
                    None
                }
            })
            .collect();

        readings.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });

        self.total_pages = total_pages(&readings);
        self.readings = readings;
        self.is_loading = false;
        self.last_error = None;
    }

    /// Record a subscription failure, keeping the last known list
    pub fn apply_error(&mut self, message: impl Into<String>) {
        self.is_loading = false;
        self.last_error = Some(message.into());
    }
}

/// The running projection task; aborting it drops the subscription
struct ActiveSubscription {
    collection: CollectionPath,
    task: JoinHandle<()>,
}

impl Drop for ActiveSubscription {
    fn drop(&mut self) {
        debug!("Stopping projection of {}", self.collection);
        self.task.abort();
    }
}

/// Keeps [`ProjectionState`] in step with one collection at a time
pub struct SyncProjection {
    state: Arc<watch::Sender<ProjectionState>>,
    /// Bumped on every (de)activation; stale tasks compare and back off
    generation: Arc<AtomicU64>,
    active: Option<ActiveSubscription>,
}

impl SyncProjection {
    /// An inactive projection with an empty list
    pub fn new() -> Self {
        let (state, _) = watch::channel(ProjectionState::default());
        Self {
            state: Arc::new(state),
            generation: Arc::new(AtomicU64::new(0)),
            active: None,
        }
    }

    /// Current state
    pub fn state(&self) -> ProjectionState {
        self.state.borrow().clone()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<ProjectionState> {
        self.state.subscribe()
    }

    /// Collection currently mirrored, if any
    pub fn collection(&self) -> Option<&CollectionPath> {
        self.active.as_ref().map(|a| &a.collection)
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Mirror `collection`, replacing any previous subscription
    ///
    /// Does nothing if `collection` is already active. Otherwise the list is
    /// cleared and the state goes back to loading until the first delivery.
    /// Must be called within a Tokio runtime.
    pub fn activate<S: DocumentStore>(&mut self, store: &S, collection: CollectionPath) {
        if self.collection() == Some(&collection) {
            return;
        }

        self.active = None;
        let generation = self.reset(ProjectionState::loading());

        debug!("Starting projection of {}", collection);
        let subscription = store.subscribe(&collection);
        let task = tokio::spawn(run_projection(
            subscription,
            collection.clone(),
            self.state.clone(),
            self.generation.clone(),
            generation,
        ));

        self.active = Some(ActiveSubscription { collection, task });
    }

    /// Stop mirroring and clear the list
    pub fn deactivate(&mut self) {
        if self.active.take().is_some() || self.state.borrow().is_loading {
            self.reset(ProjectionState::default());
        }
    }

    /// Start a new generation with `initial` as its state
    fn reset(&self, initial: ProjectionState) -> u64 {
        let mut generation = 0;
        self.state.send_modify(|state| {
            generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *state = initial;
        });
        generation
    }
}

impl Default for SyncProjection {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply deliveries until the subscription fails, ends, or is aborted
async fn run_projection(
    mut subscription: Subscription,
    collection: CollectionPath,
    state: Arc<watch::Sender<ProjectionState>>,
    current: Arc<AtomicU64>,
    generation: u64,
) {
    while let Some(delivery) = subscription.recv().await {
        match delivery {
            Delivery::Snapshot(documents) => {
                debug!(
                    "Delivery for {} ({} documents)",
                    collection,
                    documents.len()
                );
                state.send_if_modified(|state| {
                    if current.load(Ordering::SeqCst) != generation {
                        return false;
                    }
                    state.apply_snapshot(documents);
                    true
                });
            }
            Delivery::Error(e) => {
                error!("Subscription to {} failed: {}", collection, e);
                state.send_if_modified(|state| {
                    if current.load(Ordering::SeqCst) != generation {
                        return false;
                    }
                    state.apply_error(e.to_string());
                    true
                });
                return;
            }
        }
    }

    debug!("Subscription to {} ended", collection);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ReadingFields, UserId};
    use crate::store::MemoryStore;
    use crate::testing::{eventually, ids, reading_doc, ScriptedStore};
    use serde_json::json;
    use std::time::Duration;

    fn collection(user: &str) -> CollectionPath {
        CollectionPath::readings("test", &UserId::new(user))
    }

    async fn wait_for(
        rx: &mut watch::Receiver<ProjectionState>,
        check: impl FnMut(&ProjectionState) -> bool,
    ) -> ProjectionState {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(check))
            .await
            .expect("timed out waiting for projection")
            .unwrap()
            .clone()
    }

    #[test]
    fn test_apply_snapshot_sorts_and_totals() {
        let mut state = ProjectionState::loading();
        state.apply_snapshot(vec![reading_doc("a", 5, 1000), reading_doc("b", 3, 1001)]);

        assert_eq!(ids(&state.readings), vec!["b", "a"]);
        assert_eq!(state.total_pages, 8);
        assert!(!state.is_loading);
    }

    #[test]
    fn test_apply_snapshot_is_idempotent() {
        let snapshot = vec![
            reading_doc("x", 2, 50),
            reading_doc("y", 9, 10),
            reading_doc("z", 4, 50),
        ];

        let mut state = ProjectionState::loading();
        state.apply_snapshot(snapshot.clone());
        let first = state.clone();
        state.apply_snapshot(snapshot);
        assert_eq!(state, first);
    }

    #[test]
    fn test_older_entry_sorts_below_newer() {
        let mut state = ProjectionState::default();
        state.apply_snapshot(vec![reading_doc("new", 1, 500), reading_doc("mid", 1, 300)]);

        state.apply_snapshot(vec![
            reading_doc("new", 1, 500),
            reading_doc("mid", 1, 300),
            reading_doc("old", 1, 100),
        ]);
        assert_eq!(ids(&state.readings), vec!["new", "mid", "old"]);
        assert!(state
            .readings
            .windows(2)
            .all(|w| w[0].timestamp >= w[1].timestamp));
    }

    #[test]
    fn test_apply_snapshot_skips_malformed_documents() {
        let mut bad = reading_doc("bad", 1, 1);
        bad.fields.insert("pages".to_string(), json!("many"));
        let zero = reading_doc("zero", 0, 2);

        let mut state = ProjectionState::default();
        state.apply_snapshot(vec![bad, zero, reading_doc("ok", 6, 3)]);
        assert_eq!(ids(&state.readings), vec!["ok"]);
        assert_eq!(state.total_pages, 6);
    }

    #[test]
    fn test_apply_error_keeps_list() {
        let mut state = ProjectionState::default();
        state.apply_snapshot(vec![reading_doc("a", 5, 1)]);
        state.apply_error("permission denied");

        assert_eq!(ids(&state.readings), vec!["a"]);
        assert_eq!(state.last_error.as_deref(), Some("permission denied"));
        assert!(!state.is_loading);
    }

    #[tokio::test]
    async fn test_projection_follows_deliveries() {
        let store = ScriptedStore::new();
        let path = collection("u1");
        let mut projection = SyncProjection::new();
        let mut rx = projection.subscribe();

        projection.activate(&store, path.clone());
        assert!(projection.state().is_loading);

        store.deliver(&path, vec![reading_doc("a", 5, 1), reading_doc("b", 3, 2)]);
        let state = wait_for(&mut rx, |s| !s.is_loading).await;
        assert_eq!(ids(&state.readings), vec!["b", "a"]);
        assert_eq!(state.total_pages, 8);

        store.deliver(&path, vec![reading_doc("b", 3, 2)]);
        let state = wait_for(&mut rx, |s| s.readings.len() == 1).await;
        assert_eq!(state.total_pages, 3);
    }

    #[tokio::test]
    async fn test_subscription_error_freezes_list() {
        let store = ScriptedStore::new();
        let path = collection("u1");
        let mut projection = SyncProjection::new();
        let mut rx = projection.subscribe();
        projection.activate(&store, path.clone());

        store.deliver(&path, vec![reading_doc("a", 5, 1)]);
        wait_for(&mut rx, |s| !s.is_loading).await;

        store.fail_subscriptions(&path, "permission denied");
        let state = wait_for(&mut rx, |s| s.last_error.is_some()).await;
        assert_eq!(ids(&state.readings), vec!["a"]);

        // The task has stopped; later deliveries are not applied
        assert!(eventually(|| store.open_subscriptions(&path) == 0).await);
        store.deliver(&path, vec![]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(projection.state().readings.len(), 1);
    }

    #[tokio::test]
    async fn test_first_delivery_error_stops_loading() {
        let store = ScriptedStore::new();
        let path = collection("u1");
        let mut projection = SyncProjection::new();
        let mut rx = projection.subscribe();
        projection.activate(&store, path.clone());

        store.fail_subscriptions(&path, "denied");
        let state = wait_for(&mut rx, |s| !s.is_loading).await;
        assert!(state.readings.is_empty());
        assert!(state.last_error.is_some());
    }

    #[tokio::test]
    async fn test_user_switch_cancels_and_clears() {
        let store = ScriptedStore::new();
        let first = collection("u1");
        let second = collection("u2");
        let mut projection = SyncProjection::new();
        let mut rx = projection.subscribe();

        projection.activate(&store, first.clone());
        store.deliver(&first, vec![reading_doc("a", 5, 1)]);
        wait_for(&mut rx, |s| !s.is_loading).await;

        projection.activate(&store, second.clone());
        let state = projection.state();
        assert!(state.readings.is_empty());
        assert!(state.is_loading);
        assert_eq!(projection.collection(), Some(&second));

        assert!(eventually(|| store.open_subscriptions(&first) == 0).await);
        assert_eq!(store.open_subscriptions(&second), 1);

        // A late delivery for the old user never shows up
        store.deliver(&first, vec![reading_doc("a", 5, 1)]);
        store.deliver(&second, vec![reading_doc("c", 2, 9)]);
        let state = wait_for(&mut rx, |s| !s.is_loading).await;
        assert_eq!(ids(&state.readings), vec!["c"]);
    }

    #[tokio::test]
    async fn test_activate_same_collection_keeps_subscription() {
        let store = ScriptedStore::new();
        let path = collection("u1");
        let mut projection = SyncProjection::new();

        projection.activate(&store, path.clone());
        projection.activate(&store, path.clone());
        assert_eq!(store.open_subscriptions(&path), 1);
    }

    #[tokio::test]
    async fn test_deactivate_and_drop_cancel_subscription() {
        let store = ScriptedStore::new();
        let path = collection("u1");

        let mut projection = SyncProjection::new();
        projection.activate(&store, path.clone());
        projection.deactivate();
        assert!(!projection.is_active());
        assert!(!projection.state().is_loading);
        assert!(eventually(|| store.open_subscriptions(&path) == 0).await);

        let mut projection = SyncProjection::new();
        projection.activate(&store, path.clone());
        drop(projection);
        assert!(eventually(|| store.open_subscriptions(&path) == 0).await);
    }

    #[tokio::test]
    async fn test_projection_over_memory_store() {
        let store = MemoryStore::new();
        let path = collection("u1");
        store.put(
            &path,
            "a",
            ReadingFields {
                pages: 5,
                timestamp: 10,
            }
            .into_fields(),
        );

        let mut projection = SyncProjection::new();
        let mut rx = projection.subscribe();
        projection.activate(&store, path.clone());

        let state = wait_for(&mut rx, |s| !s.is_loading).await;
        assert_eq!(state.total_pages, 5);

        store
            .insert(&path, ReadingFields::now(2).into_fields())
            .await
            .unwrap();
        let state = wait_for(&mut rx, |s| s.readings.len() == 2).await;
        assert_eq!(state.total_pages, 7);
        assert_eq!(state.readings[1].id, "a");
    }
}
