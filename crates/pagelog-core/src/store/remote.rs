//! Remote document store client
//!
//! Talks to `pagelog serve` over a single WebSocket connection. A background
//! task owns the socket and multiplexes:
//!
//! - requests (insert/delete), matched to replies by `request_id`
//! - subscriptions, matched to pushed snapshots by `subscription_id`
//!
//! When the connection drops, every pending request fails with
//! [`StoreError::Closed`] and every live subscription receives a final
//! [`Delivery::Error`]. The client does not reconnect on its own.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::protocol::{ClientMessage, ServerMessage};
use super::{
    CollectionPath, Delivery, DocumentStore, Fields, StoreError, StoreResult, Subscription,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;

/// Commands sent to the connection task
enum Command {
    Subscribe {
        subscription_id: u64,
        path: CollectionPath,
        tx: mpsc::UnboundedSender<Delivery>,
    },
    Unsubscribe {
        subscription_id: u64,
    },
    Request {
        request_id: u64,
        message: ClientMessage,
        reply: oneshot::Sender<StoreResult<ServerMessage>>,
    },
}

/// Document store reached over WebSocket
pub struct RemoteStore {
    url: String,
    command_tx: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
}

impl RemoteStore {
    /// Connect to a store server
    pub async fn connect(url: &str) -> StoreResult<Self> {
        info!("Connecting to document store at {}", url);

        let connect = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url)).await;
        let (ws_stream, _response) = match connect {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                return Err(StoreError::Connection {
                    url: url.to_string(),
                    details: e.to_string(),
                })
            }
            Err(_) => {
                return Err(StoreError::Connection {
                    url: url.to_string(),
                    details: "timed out".to_string(),
                })
            }
        };

        let (command_tx, command_rx) = mpsc::unbounded_channel();

        tokio::spawn(connection_task(url.to_string(), ws_stream, command_rx));

        Ok(Self {
            url: url.to_string(),
            command_tx,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Server URL
    pub fn url(&self) -> &str {
        &self.url
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn request(&self, request_id: u64, message: ClientMessage) -> StoreResult<ServerMessage> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Request {
                request_id,
                message,
                reply: reply_tx,
            })
            .map_err(|_| StoreError::Closed)?;

        reply_rx.await.map_err(|_| StoreError::Closed)?
    }
}

impl DocumentStore for RemoteStore {
    fn subscribe(&self, path: &CollectionPath) -> Subscription {
        let subscription_id = self.next_id();
        let (tx, rx) = mpsc::unbounded_channel();

        let sent = self.command_tx.send(Command::Subscribe {
            subscription_id,
            path: path.clone(),
            tx,
        });
        if sent.is_err() {
            return Subscription::failed(StoreError::Closed);
        }

        let command_tx = self.command_tx.clone();
        Subscription::new(rx, move || {
            let _ = command_tx.send(Command::Unsubscribe { subscription_id });
        })
    }

    async fn insert(&self, path: &CollectionPath, fields: Fields) -> StoreResult<String> {
        let request_id = self.next_id();
        let message = ClientMessage::Insert {
            request_id,
            path: path.clone(),
            fields,
        };

        match self.request(request_id, message).await? {
            ServerMessage::Inserted { id, .. } => Ok(id),
            other => Err(unexpected_reply(&other)),
        }
    }

    async fn delete_by_id(&self, path: &CollectionPath, id: &str) -> StoreResult<()> {
        let request_id = self.next_id();
        let message = ClientMessage::Delete {
            request_id,
            path: path.clone(),
            id: id.to_string(),
        };

        match self.request(request_id, message).await? {
            ServerMessage::Deleted { .. } => Ok(()),
            other => Err(unexpected_reply(&other)),
        }
    }
}

fn unexpected_reply(message: &ServerMessage) -> StoreError {
    StoreError::Remote(format!("unexpected reply from server: {:?}", message))
}

/// Owns the socket until it closes or every handle is gone
async fn connection_task(
    url: String,
    ws_stream: WsStream,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
) {
    let (mut write, mut read) = ws_stream.split();
    let mut pending: HashMap<u64, oneshot::Sender<StoreResult<ServerMessage>>> = HashMap::new();
    let mut subscriptions: HashMap<u64, mpsc::UnboundedSender<Delivery>> = HashMap::new();

    loop {
        tokio::select! {
            cmd = command_rx.recv() => {
                let Some(cmd) = cmd else {
                    // Every handle dropped
                    write.close().await.ok();
                    break;
                };

                match cmd {
                    Command::Subscribe { subscription_id, path, tx } => {
                        let message = ClientMessage::Subscribe { subscription_id, path };
                        match send(&mut write, &message).await {
                            Ok(()) => {
                                subscriptions.insert(subscription_id, tx);
                            }
                            Err(e) if e.is_disconnect() => {
                                let _ = tx.send(Delivery::Error(StoreError::Closed));
                                warn!("Store connection to {} lost: {}", url, e);
                                break;
                            }
                            Err(e) => {
                                let _ = tx.send(Delivery::Error(e));
                            }
                        }
                    }
                    Command::Unsubscribe { subscription_id } => {
                        if subscriptions.remove(&subscription_id).is_some() {
                            let message = ClientMessage::Unsubscribe { subscription_id };
                            if let Err(e) = send(&mut write, &message).await {
                                if e.is_disconnect() {
                                    warn!("Store connection to {} lost: {}", url, e);
                                    break;
                                }
                            }
                        }
                    }
                    Command::Request { request_id, message, reply } => {
                        match send(&mut write, &message).await {
                            Ok(()) => {
                                pending.insert(request_id, reply);
                            }
                            Err(e) if e.is_disconnect() => {
                                let _ = reply.send(Err(StoreError::Closed));
                                warn!("Store connection to {} lost: {}", url, e);
                                break;
                            }
                            Err(e) => {
                                let _ = reply.send(Err(e));
                            }
                        }
                    }
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => match ServerMessage::decode(&data) {
                        Ok(message) => dispatch(message, &mut pending, &mut subscriptions),
                        Err(e) => warn!("Ignoring undecodable message from {}: {}", url, e),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Store server {} closed the connection", url);
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("Store connection to {} failed: {}", url, e);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(StoreError::Closed));
    }
    for (_, tx) in subscriptions.drain() {
        let _ = tx.send(Delivery::Error(StoreError::Closed));
    }
}

/// Route a server message to its waiting request or subscription
fn dispatch(
    message: ServerMessage,
    pending: &mut HashMap<u64, oneshot::Sender<StoreResult<ServerMessage>>>,
    subscriptions: &mut HashMap<u64, mpsc::UnboundedSender<Delivery>>,
) {
    match message {
        ServerMessage::Snapshot {
            subscription_id,
            documents,
        } => {
            if let Some(tx) = subscriptions.get(&subscription_id) {
                debug!(
                    "Snapshot for subscription {} ({} documents)",
                    subscription_id,
                    documents.len()
                );
                let _ = tx.send(Delivery::Snapshot(documents));
            }
        }
        ServerMessage::SubscriptionError {
            subscription_id,
            message,
        } => {
            if let Some(tx) = subscriptions.remove(&subscription_id) {
                let _ = tx.send(Delivery::Error(StoreError::Remote(message)));
            }
        }
        ServerMessage::Error {
            request_id,
            message,
        } => {
            if let Some(reply) = pending.remove(&request_id) {
                let _ = reply.send(Err(StoreError::Remote(message)));
            }
        }
        ServerMessage::Inserted { request_id, .. } | ServerMessage::Deleted { request_id } => {
            if let Some(reply) = pending.remove(&request_id) {
                let _ = reply.send(Ok(message));
            } else {
                debug!("Reply for unknown request {}", request_id);
            }
        }
    }
}

async fn send(write: &mut WsWriter, message: &ClientMessage) -> StoreResult<()> {
    let bytes = message.encode()?;
    write
        .send(Message::Binary(bytes))
        .await
        .map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, e)))
}
