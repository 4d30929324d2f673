//! Subscriber fan-out for the in-process stores
//!
//! Callers must hold their own data lock while calling [`SubscriberHub::register`]
//! and [`SubscriberHub::publish`]; that is what keeps deliveries for a
//! collection in commit order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;

use super::{CollectionPath, Delivery, Document, StoreError, StoreResult, Subscription};

#[derive(Default)]
struct HubInner {
    next_id: u64,
    subscribers: HashMap<u64, Subscriber>,
}

struct Subscriber {
    path: CollectionPath,
    tx: mpsc::UnboundedSender<Delivery>,
}

/// Registry of live subscriptions, keyed by collection
#[derive(Clone, Default)]
pub(crate) struct SubscriberHub {
    inner: Arc<Mutex<HubInner>>,
}

impl SubscriberHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber and hand it its initial snapshot
    pub fn register(
        &self,
        path: &CollectionPath,
        initial: StoreResult<Vec<Document>>,
    ) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();

        let documents = match initial {
            Ok(documents) => documents,
            Err(e) => {
                let _ = tx.send(Delivery::Error(e));
                return Subscription::detached(rx);
            }
        };
        let _ = tx.send(Delivery::Snapshot(documents));

        let id = {
            let mut inner = self.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.subscribers.insert(
                id,
                Subscriber {
                    path: path.clone(),
                    tx,
                },
            );
            id
        };
        debug!("Registered subscriber {} on {}", id, path);

        let hub = self.clone();
        Subscription::new(rx, move || hub.unregister(id))
    }

    /// Send a fresh snapshot to every subscriber of `path`
    ///
    /// Subscribers whose receiving end is gone are pruned.
    pub fn publish(&self, path: &CollectionPath, snapshot: &[Document]) {
        let mut inner = self.lock();
        inner.subscribers.retain(|_, sub| {
            if &sub.path != path {
                return true;
            }
            sub.tx.send(Delivery::Snapshot(snapshot.to_vec())).is_ok()
        });
    }

    /// End every subscription to `path` with an error
    ///
    /// Used when a change was committed but the new snapshot could not be read.
    pub fn fail(&self, path: &CollectionPath, message: &str) {
        let mut inner = self.lock();
        inner.subscribers.retain(|_, sub| {
            if &sub.path != path {
                return true;
            }
            let _ = sub
                .tx
                .send(Delivery::Error(StoreError::Decode(message.to_string())));
            false
        });
    }

    /// Whether anyone is subscribed to `path`
    pub fn has_subscribers(&self, path: &CollectionPath) -> bool {
        self.lock().subscribers.values().any(|sub| &sub.path == path)
    }

    /// Number of live subscribers across all collections
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn unregister(&self, id: u64) {
        if self.lock().subscribers.remove(&id).is_some() {
            debug!("Cancelled subscriber {}", id);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(name: &str) -> CollectionPath {
        CollectionPath::new(name)
    }

    fn doc(id: &str) -> Document {
        Document {
            id: id.to_string(),
            fields: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_register_sends_initial_snapshot() {
        let hub = SubscriberHub::new();
        let mut sub = hub.register(&path("a"), Ok(vec![doc("1")]));

        match sub.recv().await {
            Some(Delivery::Snapshot(docs)) => assert_eq!(docs, vec![doc("1")]),
            other => panic!("unexpected delivery: {:?}", other),
        }
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_publish_only_reaches_matching_path() {
        let hub = SubscriberHub::new();
        let mut a = hub.register(&path("a"), Ok(vec![]));
        let mut b = hub.register(&path("b"), Ok(vec![]));
        a.recv().await;
        b.recv().await;

        hub.publish(&path("a"), &[doc("x")]);

        assert!(matches!(a.recv().await, Some(Delivery::Snapshot(d)) if d.len() == 1));
        assert!(b.try_recv().is_none());
    }

    #[test]
    fn test_drop_unregisters() {
        let hub = SubscriberHub::new();
        let sub = hub.register(&path("a"), Ok(vec![]));
        assert!(hub.has_subscribers(&path("a")));

        drop(sub);
        assert!(!hub.has_subscribers(&path("a")));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_fail_ends_matching_subscriptions() {
        let hub = SubscriberHub::new();
        let mut a = hub.register(&path("a"), Ok(vec![]));
        let mut b = hub.register(&path("b"), Ok(vec![]));
        a.recv().await;
        b.recv().await;

        hub.fail(&path("a"), "document x: bad json");

        assert!(matches!(a.recv().await, Some(Delivery::Error(StoreError::Decode(_)))));
        assert!(b.try_recv().is_none());
        assert!(!hub.has_subscribers(&path("a")));
        assert!(hub.has_subscribers(&path("b")));
    }

    #[tokio::test]
    async fn test_failed_initial_load_is_not_registered() {
        let hub = SubscriberHub::new();
        let mut sub = hub.register(&path("a"), Err(StoreError::Closed));

        assert!(matches!(sub.recv().await, Some(Delivery::Error(_))));
        assert_eq!(hub.subscriber_count(), 0);
    }
}
