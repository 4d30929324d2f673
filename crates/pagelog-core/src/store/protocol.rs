//! Wire protocol between `RemoteStore` and `pagelog serve`
//!
//! Messages are CBOR-encoded and sent as binary WebSocket frames. Requests
//! carry a client-chosen `request_id`; subscriptions a client-chosen
//! `subscription_id`. Both are unique per connection.

use serde::{Deserialize, Serialize};

use super::{CollectionPath, Document, Fields, StoreError, StoreResult};

/// Messages sent to the store server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Start receiving snapshots of a collection
    Subscribe {
        subscription_id: u64,
        path: CollectionPath,
    },

    /// Stop a subscription
    Unsubscribe { subscription_id: u64 },

    /// Insert a document
    Insert {
        request_id: u64,
        path: CollectionPath,
        fields: Fields,
    },

    /// Delete a document by id
    Delete {
        request_id: u64,
        path: CollectionPath,
        id: String,
    },
}

/// Messages received from the store server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Full contents of a subscribed collection
    Snapshot {
        subscription_id: u64,
        documents: Vec<Document>,
    },

    /// A subscription failed and is over
    SubscriptionError {
        subscription_id: u64,
        message: String,
    },

    /// Insert succeeded
    Inserted { request_id: u64, id: String },

    /// Delete succeeded
    Deleted { request_id: u64 },

    /// A request failed
    Error { request_id: u64, message: String },
}

impl ClientMessage {
    /// Encode message to CBOR bytes
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        encode(self)
    }

    /// Decode message from CBOR bytes
    pub fn decode(bytes: &[u8]) -> StoreResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| StoreError::Decode(e.to_string()))
    }
}

impl ServerMessage {
    /// Encode message to CBOR bytes
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        encode(self)
    }

    /// Decode message from CBOR bytes
    pub fn decode(bytes: &[u8]) -> StoreResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| StoreError::Decode(e.to_string()))
    }
}

fn encode<T: Serialize>(message: &T) -> StoreResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(message, &mut bytes).map_err(|e| StoreError::Encode(e.to_string()))?;
    Ok(bytes)
}
