//! Document store interface
//!
//! A document store holds schemaless documents grouped into collections,
//! addressed by a slash-separated path. pagelog keeps one collection of
//! reading documents per application instance and user:
//!
//! ```text
//! apps/{app_id}/users/{user_id}/readings
//! ```
//!
//! ## Contract
//!
//! - `subscribe` delivers the full current set of documents first, then one
//!   full snapshot after every change to the collection, in commit order.
//! - `insert` assigns the document id.
//! - `delete_by_id` removes a document; deleting a missing id succeeds.
//!
//! Subscriptions are channels: the store pushes [`Delivery`] values and the
//! consumer pulls them with [`Subscription::recv`]. Dropping the
//! [`Subscription`] cancels it.
//!
//! ## Backends
//!
//! - [`MemoryStore`]: in-process, volatile
//! - [`SqliteStore`]: in-process, backed by a SQLite file
//! - [`RemoteStore`]: WebSocket client for `pagelog serve`

mod error;
mod hub;
mod memory;
mod protocol;
mod remote;
mod schema;
mod sqlite;

use std::future::Future;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::models::UserId;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use protocol::{ClientMessage, ServerMessage};
pub use remote::RemoteStore;
pub use sqlite::SqliteStore;

pub(crate) use hub::SubscriberHub;

/// Schemaless document fields
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Path of a collection inside the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The readings collection of one user in one application instance
    pub fn readings(app_id: &str, user_id: &UserId) -> Self {
        Self(format!("apps/{}/users/{}/readings", app_id, user_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Store-assigned identifier, unique within its collection
    pub id: String,
    pub fields: Fields,
}

/// One message on a subscription channel
#[derive(Debug)]
pub enum Delivery {
    /// Full current contents of the collection
    Snapshot(Vec<Document>),
    /// The subscription failed; no further deliveries follow
    Error(StoreError),
}

type CancelFn = Box<dyn FnOnce() + Send>;

/// Live subscription to a collection
///
/// Cancels itself store-side when dropped.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Delivery>,
    cancel: Option<CancelFn>,
}

impl Subscription {
    /// Wrap a delivery channel and the action that unregisters it
    pub fn new(
        rx: mpsc::UnboundedReceiver<Delivery>,
        cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            rx,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to unregister
    pub fn detached(rx: mpsc::UnboundedReceiver<Delivery>) -> Self {
        Self { rx, cancel: None }
    }

    /// A subscription that immediately reports an error
    pub fn failed(error: StoreError) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Delivery::Error(error));
        Self::detached(rx)
    }

    /// Wait for the next delivery
    ///
    /// Returns `None` once the store side has gone away.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    /// Take a delivery if one is already queued
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.rx.try_recv().ok()
    }

    /// Cancel the subscription now
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("cancelled", &self.cancel.is_none())
            .finish()
    }
}

/// A hosted document store
pub trait DocumentStore: Send + Sync + 'static {
    /// Subscribe to every change of a collection
    fn subscribe(&self, path: &CollectionPath) -> Subscription;

    /// Insert a document, returning its store-assigned id
    fn insert(
        &self,
        path: &CollectionPath,
        fields: Fields,
    ) -> impl Future<Output = StoreResult<String>> + Send;

    /// Delete a document by id
    fn delete_by_id(
        &self,
        path: &CollectionPath,
        id: &str,
    ) -> impl Future<Output = StoreResult<()>> + Send;
}

/// Any of the bundled store backends
pub enum Backend {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
    Remote(RemoteStore),
}

impl Backend {
    /// Human-readable description for status output
    pub fn describe(&self) -> String {
        match self {
            Backend::Memory(_) => "memory (volatile)".to_string(),
            Backend::Sqlite(store) => format!("sqlite ({})", store.path().display()),
            Backend::Remote(store) => format!("remote ({})", store.url()),
        }
    }
}

impl DocumentStore for Backend {
    fn subscribe(&self, path: &CollectionPath) -> Subscription {
        match self {
            Backend::Memory(store) => store.subscribe(path),
            Backend::Sqlite(store) => store.subscribe(path),
            Backend::Remote(store) => store.subscribe(path),
        }
    }

    async fn insert(&self, path: &CollectionPath, fields: Fields) -> StoreResult<String> {
        match self {
            Backend::Memory(store) => store.insert(path, fields).await,
            Backend::Sqlite(store) => store.insert(path, fields).await,
            Backend::Remote(store) => store.insert(path, fields).await,
        }
    }

    async fn delete_by_id(&self, path: &CollectionPath, id: &str) -> StoreResult<()> {
        match self {
            Backend::Memory(store) => store.delete_by_id(path, id).await,
            Backend::Sqlite(store) => store.delete_by_id(path, id).await,
            Backend::Remote(store) => store.delete_by_id(path, id).await,
        }
    }
}

/// Open the store described by the configuration
///
/// A configured `store_url` selects the remote store; otherwise the local
/// SQLite store in the data directory is used.
pub async fn open(config: &Config) -> Result<Backend> {
    if let Some(ref url) = config.store_url {
        let store = RemoteStore::connect(url)
            .await
            .with_context(|| format!("Failed to connect to store at {}", url))?;
        return Ok(Backend::Remote(store));
    }

    let path = config.database_path();
    let store = SqliteStore::open(&path)
        .with_context(|| format!("Failed to open store database at {:?}", path))?;
    Ok(Backend::Sqlite(store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_readings_path() {
        let path = CollectionPath::readings("quran-tracker", &UserId::from("u1"));
        assert_eq!(path.as_str(), "apps/quran-tracker/users/u1/readings");
        assert_eq!(path.to_string(), "apps/quran-tracker/users/u1/readings");
    }

    #[test]
    fn test_subscription_cancels_once_on_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = mpsc::unbounded_channel();
        let counter = calls.clone();
        let sub = Subscription::new(rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sub.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_subscription_delivers_error() {
        let mut sub = Subscription::failed(StoreError::Closed);
        assert!(matches!(
            sub.recv().await,
            Some(Delivery::Error(StoreError::Closed))
        ));
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_open_defaults_to_sqlite() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = Config {
            data_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        };

        let backend = open(&config).await.unwrap();
        assert!(matches!(backend, Backend::Sqlite(_)));
        assert!(backend.describe().starts_with("sqlite"));
    }
}
