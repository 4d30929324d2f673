//! SQLite schema for the document store
//!
//! One table holds every collection. Fields are stored as a JSON object so
//! the store stays schemaless. The schema version lives in SQLite's
//! `user_version` pragma.

use rusqlite::{Connection, Result};
use tracing::debug;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Bring the database up to [`SCHEMA_VERSION`]
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    let version = schema_version(conn)?;
    if version >= SCHEMA_VERSION {
        return Ok(());
    }

    debug!("Migrating store schema from version {}", version);
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            fields TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (collection, id)
        );

        -- Snapshots are read per collection in insertion order
        CREATE INDEX IF NOT EXISTS idx_documents_collection
            ON documents(collection, created_at);
        "#,
    )?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

    Ok(())
}

/// Schema version recorded in the database (0 for a fresh file)
pub fn schema_version(conn: &Connection) -> Result<i32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
}
