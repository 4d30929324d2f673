//! Data models for pagelog
//!
//! Defines the reading entry, the field set written to the document store,
//! and the opaque user identifier. Entries are immutable once created: there
//! is no update path, only insert and delete.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::store::{Document, Fields};

/// Opaque, stable identifier of a signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wrap an identifier issued elsewhere
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(random_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A single logged reading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingEntry {
    /// Identifier assigned by the document store
    pub id: String,
    /// Pages read in this entry (always positive)
    pub pages: u32,
    /// Creation time in milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl ReadingEntry {
    pub fn new(id: impl Into<String>, pages: u32, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            pages,
            timestamp,
        }
    }

    /// Convert a store document into an entry
    ///
    /// The store is schemaless and does not validate, so anything that is not
    /// `{pages: positive integer, timestamp: integer}` is rejected here.
    pub fn from_document(doc: &Document) -> Result<Self, EntryError> {
        let fields: ReadingFields = serde_json::from_value(serde_json::Value::Object(
            doc.fields.clone(),
        ))
        .map_err(|e| EntryError::InvalidFields {
            id: doc.id.clone(),
            details: e.to_string(),
        })?;

        if fields.pages == 0 {
            return Err(EntryError::NonPositivePages { id: doc.id.clone() });
        }

        Ok(Self {
            id: doc.id.clone(),
            pages: fields.pages,
            timestamp: fields.timestamp,
        })
    }
}

/// The fields written to the store by add-reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingFields {
    pub pages: u32,
    pub timestamp: i64,
}

impl ReadingFields {
    /// Fields for a reading taken right now
    pub fn now(pages: u32) -> Self {
        Self {
            pages,
            timestamp: now_millis(),
        }
    }

    /// Convert into the store's schemaless field map
    pub fn into_fields(self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("pages".to_string(), self.pages.into());
        fields.insert("timestamp".to_string(), self.timestamp.into());
        fields
    }
}

/// Errors converting a store document into a [`ReadingEntry`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EntryError {
    #[error("Document '{id}' has invalid reading fields: {details}")]
    InvalidFields { id: String, details: String },

    #[error("Document '{id}' has a non-positive page count")]
    NonPositivePages { id: String },
}

/// Errors parsing the pages input
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PagesError {
    #[error("'{0}' is not a whole number")]
    Invalid(String),

    #[error("Page count must be greater than zero")]
    NotPositive,
}

/// Parse user input into a positive page count
pub fn parse_pages(input: &str) -> Result<u32, PagesError> {
    let value: i64 = input
        .trim()
        .parse()
        .map_err(|_| PagesError::Invalid(input.to_string()))?;

    if value <= 0 {
        return Err(PagesError::NotPositive);
    }

    u32::try_from(value).map_err(|_| PagesError::Invalid(input.to_string()))
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Random base58 identifier (used for users and store-assigned document ids)
pub(crate) fn random_id() -> String {
    bs58::encode(Uuid::new_v4().as_bytes()).into_string()
}
