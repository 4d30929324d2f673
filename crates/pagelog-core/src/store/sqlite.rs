//! SQLite-backed document store
//!
//! Durable in-process store. Used directly by the CLI when no remote store
//! is configured, and by `pagelog serve` to host collections for remote
//! clients. Change fan-out is in-process only: every process that opens the
//! same file sees its own writes live, others see them on next subscribe.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::{params, Connection};
use tracing::{debug, warn};

use super::schema::ensure_schema;
use super::{
    CollectionPath, Document, DocumentStore, Fields, StoreError, StoreResult, SubscriberHub,
    Subscription,
};
use crate::models::{now_millis, random_id};

/// Durable document store on a SQLite file
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    hub: SubscriberHub,
    path: PathBuf,
}

impl SqliteStore {
    /// Open or create the database at `path`
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::with_connection(conn, path.to_path_buf())
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, PathBuf::from(":memory:"))
    }

    fn with_connection(conn: Connection, path: PathBuf) -> StoreResult<Self> {
        ensure_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            hub: SubscriberHub::new(),
            path,
        })
    }

    /// Location of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    /// Send the committed state of `path` to its subscribers
    ///
    /// The write has already happened, so a snapshot that cannot be read ends
    /// the subscriptions instead of failing the write.
    fn publish(&self, conn: &Connection, path: &CollectionPath) {
        if !self.hub.has_subscribers(path) {
            return;
        }
        match load_collection(conn, path) {
            Ok(snapshot) => self.hub.publish(path, &snapshot),
            Err(e) => {
                warn!("Could not publish {} after a write: {}", path, e);
                self.hub.fail(path, &e.to_string());
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DocumentStore for SqliteStore {
    fn subscribe(&self, path: &CollectionPath) -> Subscription {
        let conn = self.lock();
        let snapshot = load_collection(&conn, path);
        self.hub.register(path, snapshot)
    }

    async fn insert(&self, path: &CollectionPath, fields: Fields) -> StoreResult<String> {
        let id = random_id();
        let json =
            serde_json::to_string(&fields).map_err(|e| StoreError::Encode(e.to_string()))?;

        let conn = self.lock();
        conn.execute(
            "INSERT INTO documents (collection, id, fields, created_at) VALUES (?, ?, ?, ?)",
            params![path.as_str(), id, json, now_millis()],
        )?;
        debug!("Inserted document {} into {}", id, path);

        self.publish(&conn, path);
        Ok(id)
    }

    async fn delete_by_id(&self, path: &CollectionPath, id: &str) -> StoreResult<()> {
        let conn = self.lock();
        let removed = conn.execute(
            "DELETE FROM documents WHERE collection = ? AND id = ?",
            params![path.as_str(), id],
        )?;

        if removed > 0 {
            debug!("Deleted document {} from {}", id, path);
            self.publish(&conn, path);
        }
        Ok(())
    }
}

/// Read every document of a collection in insertion order
fn load_collection(conn: &Connection, path: &CollectionPath) -> StoreResult<Vec<Document>> {
    let mut stmt = conn.prepare(
        "SELECT id, fields FROM documents WHERE collection = ? ORDER BY created_at, rowid",
    )?;

    let rows = stmt.query_map(params![path.as_str()], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut documents = Vec::new();
    for row in rows {
        let (id, json) = row?;
        let fields: Fields = serde_json::from_str(&json)
            .map_err(|e| StoreError::Decode(format!("document {}: {}", id, e)))?;
        documents.push(Document { id, fields });
    }

    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ReadingEntry, ReadingFields};
    use crate::store::Delivery;
    use tempfile::TempDir;

    fn readings() -> CollectionPath {
        CollectionPath::new("apps/test/users/u1/readings")
    }

    async fn next_snapshot(sub: &mut Subscription) -> Vec<Document> {
        match sub.recv().await {
            Some(Delivery::Snapshot(docs)) => docs,
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_insert_then_subscribe() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store
            .insert(
                &readings(),
                ReadingFields {
                    pages: 5,
                    timestamp: 1000,
                }
                .into_fields(),
            )
            .await
            .unwrap();

        let mut sub = store.subscribe(&readings());
        let docs = next_snapshot(&mut sub).await;
        assert_eq!(docs.len(), 1);

        let entry = ReadingEntry::from_document(&docs[0]).unwrap();
        assert_eq!(entry, ReadingEntry::new(id, 5, 1000));
    }

    #[tokio::test]
    async fn test_changes_are_published() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut sub = store.subscribe(&readings());
        assert!(next_snapshot(&mut sub).await.is_empty());

        let id = store
            .insert(&readings(), ReadingFields::now(2).into_fields())
            .await
            .unwrap();
        assert_eq!(next_snapshot(&mut sub).await.len(), 1);

        store.delete_by_id(&readings(), &id).await.unwrap();
        assert!(next_snapshot(&mut sub).await.is_empty());

        store.delete_by_id(&readings(), &id).await.unwrap();
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_data_persists_across_reopens() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("pagelog.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .insert(&readings(), ReadingFields::now(7).into_fields())
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let mut sub = store.subscribe(&readings());
        let docs = next_snapshot(&mut sub).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].fields["pages"], 7);
    }

    #[tokio::test]
    async fn test_unreadable_fields_fail_the_subscription() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .lock()
            .execute(
                "INSERT INTO documents (collection, id, fields, created_at) VALUES (?, 'bad', 'not json', 0)",
                params![readings().as_str()],
            )
            .unwrap();

        let mut sub = store.subscribe(&readings());
        assert!(matches!(
            sub.recv().await,
            Some(Delivery::Error(StoreError::Decode(_)))
        ));
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_write_commits_even_if_snapshot_is_unreadable() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut sub = store.subscribe(&readings());
        assert!(next_snapshot(&mut sub).await.is_empty());

        store
            .lock()
            .execute(
                "INSERT INTO documents (collection, id, fields, created_at) VALUES (?, 'bad', 'not json', 0)",
                params![readings().as_str()],
            )
            .unwrap();

        let result = store
            .insert(&readings(), ReadingFields::now(4).into_fields())
            .await;
        assert!(result.is_ok());

        let rows: i64 = store
            .lock()
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 2);

        assert!(matches!(
            sub.recv().await,
            Some(Delivery::Error(StoreError::Decode(_)))
        ));
        assert_eq!(store.subscriber_count(), 0);
    }
}
