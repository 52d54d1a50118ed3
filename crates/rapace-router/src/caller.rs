//! Client-side convenience wrapper over a `Router/Connect` call: register,
//! heartbeat, unicast/multicast/broadcast, correlated request/response and
//! event subscription, all multiplexed over the one underlying [`BidiCall`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rapace_core::{BidiCall, Endpoint, SerdeCodec};
use rapace_wire::{Status, StatusCode};
use tokio::sync::{mpsc, oneshot};

use crate::router::RouterMessage;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<RouterMessage>>>>;

/// One topic event delivered to a subscriber.
#[derive(Debug, Clone)]
pub struct TopicEvent {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// A point-to-point message delivered to this node by the router.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub from: Option<String>,
    pub payload: Vec<u8>,
}

pub enum InboxItem {
    Event(TopicEvent),
    Delivery(Delivery),
}

/// Drains events and unicast/multicast/broadcast deliveries that arrive
/// outside the request/response flow, which [`RouterCaller`] otherwise
/// consumes internally.
pub struct InboxStream {
    rx: mpsc::Receiver<InboxItem>,
}

impl InboxStream {
    pub async fn recv(&mut self) -> Option<InboxItem> {
        self.rx.recv().await
    }
}

/// Typed client for one `Router/Connect` session. The router allocates the
/// node's id on [`RouterCaller::register`]; this type never lets a caller
/// pick its own.
pub struct RouterCaller {
    call: Arc<BidiCall<RouterMessage, RouterMessage>>,
    pending: PendingMap,
    register_waiter: Arc<Mutex<Option<oneshot::Sender<String>>>>,
    next_request_id: AtomicU64,
}

impl RouterCaller {
    /// Opens a `Router/Connect` call and spawns the background task that
    /// demultiplexes inbound frames into request/response completions and
    /// the returned [`InboxStream`].
    pub async fn connect(endpoint: &Endpoint) -> Result<(Self, InboxStream), Status> {
        let call = Arc::new(
            endpoint
                .bidi::<RouterMessage, RouterMessage>(
                    "Router",
                    "Connect",
                    Arc::new(SerdeCodec::postcard()),
                    Arc::new(SerdeCodec::postcard()),
                )
                .await?,
        );
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let register_waiter: Arc<Mutex<Option<oneshot::Sender<String>>>> = Arc::new(Mutex::new(None));
        let (inbox_tx, inbox_rx) = mpsc::channel(64);

        let driver_call = call.clone();
        let driver_pending = pending.clone();
        let driver_register_waiter = register_waiter.clone();
        tokio::spawn(async move {
            while let Some(result) = driver_call.recv().await {
                let message = match result {
                    Ok(message) => message,
                    Err(_) => break,
                };
                match message {
                    RouterMessage::Registered { node_id } => {
                        if let Some(tx) = driver_register_waiter.lock().take() {
                            let _ = tx.send(node_id);
                        }
                    }
                    RouterMessage::Response { id, payload, success, error_message } => {
                        if let Some(tx) = driver_pending.lock().remove(&id) {
                            let _ = tx.send(RouterMessage::Response { id, payload, success, error_message });
                        }
                    }
                    RouterMessage::Event { topic, payload } => {
                        if inbox_tx
                            .send(InboxItem::Event(TopicEvent { topic, payload }))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    RouterMessage::Deliver { from, payload } => {
                        if inbox_tx
                            .send(InboxItem::Delivery(Delivery { from, payload }))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    RouterMessage::Request { id, payload, .. } => {
                        // Unhandled inbound request: respond immediately so
                        // the sender doesn't wait out its full timeout.
                        let _ = driver_call
                            .send(RouterMessage::Response {
                                id,
                                payload: Vec::new(),
                                success: true,
                                error_message: None,
                            })
                            .await;
                        let _ = payload;
                    }
                    RouterMessage::Error { message } => {
                        tracing::warn!(message, "router reported an error");
                    }
                    _ => {}
                }
            }
        });

        Ok((
            RouterCaller {
                call,
                pending,
                register_waiter,
                next_request_id: AtomicU64::new(1),
            },
            InboxStream { rx: inbox_rx },
        ))
    }

    /// Registers this connection with the router and returns the id the
    /// router assigned; callers hold this id opaquely for every subsequent
    /// call.
    pub async fn register(
        &self,
        client_name: Option<String>,
        groups: Vec<String>,
        metadata: HashMap<String, String>,
    ) -> Result<String, Status> {
        let (tx, rx) = oneshot::channel();
        *self.register_waiter.lock() = Some(tx);

        if let Err(status) = self
            .call
            .send(RouterMessage::Register { client_name, groups, metadata })
            .await
        {
            self.register_waiter.lock().take();
            return Err(status);
        }

        rx.await
            .map_err(|_| Status::new(StatusCode::Unavailable, "router connection closed"))
    }

    pub async fn deregister(&self, node_id: impl Into<String>) -> Result<(), Status> {
        self.call.send(RouterMessage::Deregister { node_id: node_id.into() }).await
    }

    pub async fn heartbeat(&self, node_id: impl Into<String>) -> Result<(), Status> {
        self.call.send(RouterMessage::Heartbeat { node_id: node_id.into() }).await
    }

    pub async fn update_metadata(
        &self,
        node_id: impl Into<String>,
        metadata: HashMap<String, String>,
    ) -> Result<(), Status> {
        self.call
            .send(RouterMessage::UpdateMetadata {
                node_id: node_id.into(),
                metadata,
            })
            .await
    }

    pub async fn send_unicast(&self, to: impl Into<String>, payload: Vec<u8>) -> Result<(), Status> {
        self.call
            .send(RouterMessage::Unicast { to: to.into(), payload })
            .await
    }

    pub async fn send_multicast(&self, group: impl Into<String>, payload: Vec<u8>) -> Result<(), Status> {
        self.call
            .send(RouterMessage::Multicast { group: group.into(), payload })
            .await
    }

    pub async fn send_broadcast(&self, payload: Vec<u8>) -> Result<(), Status> {
        self.call.send(RouterMessage::Broadcast { payload }).await
    }

    pub async fn subscribe(&self, topic: impl Into<String>) -> Result<(), Status> {
        self.call.send(RouterMessage::Subscribe { topic: topic.into() }).await
    }

    pub async fn unsubscribe(&self, topic: impl Into<String>) -> Result<(), Status> {
        self.call.send(RouterMessage::Unsubscribe { topic: topic.into() }).await
    }

    /// Sends a correlated request to `to` and awaits its response. The
    /// router guarantees a reply within `timeout` — either the target's own
    /// answer, or a synthesized `success: false` response if the target is
    /// missing or never answers — so no separate client-side race is needed.
    pub async fn send_request(
        &self,
        to: impl Into<String>,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, Status> {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        if let Err(status) = self
            .call
            .send(RouterMessage::Request {
                id,
                to: to.into(),
                payload,
                timeout_ms: timeout.as_millis() as u64,
            })
            .await
        {
            self.pending.lock().remove(&id);
            return Err(status);
        }

        match rx.await {
            Ok(RouterMessage::Response { payload, success: true, .. }) => Ok(payload),
            Ok(RouterMessage::Response { success: false, error_message, .. }) => Err(Status::new(
                StatusCode::Unavailable,
                error_message.unwrap_or_else(|| "request failed".to_string()),
            )),
            Ok(_) => Err(Status::new(StatusCode::Internal, "unexpected router reply")),
            Err(_) => Err(Status::new(StatusCode::Unavailable, "router connection closed")),
        }
    }
}
