//! Document store error handling
//!
//! Typed errors for store operations. None of these are fatal to the
//! application: callers log them and leave their state as it was.

use std::io;
use thiserror::Error;

/// Errors that can occur talking to a document store
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Could not reach the remote store
    #[error("Failed to connect to document store at '{url}': {details}")]
    Connection { url: String, details: String },

    /// The connection to the remote store is gone
    #[error("Document store connection closed")]
    Closed,

    /// The remote store rejected a request
    #[error("Document store error: {0}")]
    Remote(String),

    /// Failed to encode a document or message
    #[error("Encode error: {0}")]
    Encode(String),

    /// Failed to decode a document or message
    #[error("Decode error: {0}")]
    Decode(String),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    /// Whether the store itself is unreachable (as opposed to one bad request)
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            StoreError::Connection { .. } | StoreError::Closed | StoreError::Io(_)
        )
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
