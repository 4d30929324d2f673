//! Document store server
//!
//! Hosts any [`DocumentStore`] over WebSocket so several clients (devices,
//! terminals) share the same collections and see each other's changes live.
//!
//! Per connection:
//! - one writer task draining the outbound queue
//! - one forwarding task per subscription; aborting it drops the store
//!   subscription, which cancels it
//! - one task per insert/delete request

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::store::{ClientMessage, Delivery, DocumentStore, ServerMessage, Subscription};

/// Accept connections forever, serving `store` to each
pub async fn serve<S: DocumentStore>(listener: TcpListener, store: Arc<S>) -> Result<()> {
    let local_addr = listener
        .local_addr()
        .context("Failed to read listener address")?;
    info!("Serving document store on ws://{}", local_addr);

    loop {
        let (stream, addr) = listener
            .accept()
            .await
            .context("Failed to accept connection")?;
        debug!("Client connected from {}", addr);

        let store = store.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, store).await {
                warn!("Connection from {} failed: {:#}", addr, e);
            }
            debug!("Client {} disconnected", addr);
        });
    }
}

async fn handle_connection<S: DocumentStore>(stream: TcpStream, store: Arc<S>) -> Result<()> {
    let ws_stream = tokio_tungstenite::accept_async(stream)
        .await
        .context("WebSocket handshake failed")?;
    let (mut write, mut read) = ws_stream.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let bytes = match message.encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Dropping unencodable message: {}", e);
                    continue;
                }
            };
            if write.send(Message::Binary(bytes)).await.is_err() {
                break;
            }
        }
        write.close().await.ok();
    });

    let mut subscriptions: HashMap<u64, JoinHandle<()>> = HashMap::new();

    while let Some(msg) = read.next().await {
        let data = match msg {
            Ok(Message::Binary(data)) => data,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("Read failed: {}", e);
                break;
            }
        };

        let message = match ClientMessage::decode(&data) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring undecodable client message: {}", e);
                continue;
            }
        };

        match message {
            ClientMessage::Subscribe {
                subscription_id,
                path,
            } => {
                debug!("Subscription {} on {}", subscription_id, path);
                let subscription = store.subscribe(&path);
                let handle = tokio::spawn(forward_subscription(
                    subscription_id,
                    subscription,
                    out_tx.clone(),
                ));
                if let Some(previous) = subscriptions.insert(subscription_id, handle) {
                    previous.abort();
                }
            }
            ClientMessage::Unsubscribe { subscription_id } => {
                if let Some(handle) = subscriptions.remove(&subscription_id) {
                    debug!("Unsubscribed {}", subscription_id);
                    handle.abort();
                }
            }
            ClientMessage::Insert {
                request_id,
                path,
                fields,
            } => {
                let store = store.clone();
                let out_tx = out_tx.clone();
                tokio::spawn(async move {
                    let reply = match store.insert(&path, fields).await {
                        Ok(id) => ServerMessage::Inserted { request_id, id },
                        Err(e) => ServerMessage::Error {
                            request_id,
                            message: e.to_string(),
                        },
                    };
                    let _ = out_tx.send(reply);
                });
            }
            ClientMessage::Delete {
                request_id,
                path,
                id,
            } => {
                let store = store.clone();
                let out_tx = out_tx.clone();
                tokio::spawn(async move {
                    let reply = match store.delete_by_id(&path, &id).await {
                        Ok(()) => ServerMessage::Deleted { request_id },
                        Err(e) => ServerMessage::Error {
                            request_id,
                            message: e.to_string(),
                        },
                    };
                    let _ = out_tx.send(reply);
                });
            }
        }
    }

    for (_, handle) in subscriptions.drain() {
        handle.abort();
    }
    drop(out_tx);
    writer.await.ok();

    Ok(())
}

/// Push every delivery of one subscription to the client
async fn forward_subscription(
    subscription_id: u64,
    mut subscription: Subscription,
    out_tx: mpsc::UnboundedSender<ServerMessage>,
) {
    while let Some(delivery) = subscription.recv().await {
        let message = match delivery {
            Delivery::Snapshot(documents) => ServerMessage::Snapshot {
                subscription_id,
                documents,
            },
            Delivery::Error(e) => {
                let _ = out_tx.send(ServerMessage::SubscriptionError {
                    subscription_id,
                    message: e.to_string(),
                });
                break;
            }
        };

        if out_tx.send(message).is_err() {
            break;
        }
    }
}
