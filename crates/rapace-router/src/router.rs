//! The router's own wire protocol is just another rapace service: a single
//! bidirectional method, `Router/Connect`, that every connected node holds
//! open for its whole session. Presence, pub/sub and request/response
//! correlation are all just interpretations of [`RouterMessage`] values
//! flowing over that one call, dispatched through [`bidi_handler`] like any
//! other handler in this workspace.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as PLMutex;
use rapace_core::{bidi_handler, Handler, RequestStream, ResponseSink, ServiceContract};
use rapace_wire::{Status, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::distributor::EventDistributor;
use crate::presence::PresenceRegistry;

/// Every frame exchanged over a `Router/Connect` stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RouterMessage {
    /// Sent once by a newly connected client; the router allocates the id.
    Register {
        client_name: Option<String>,
        groups: Vec<String>,
        metadata: HashMap<String, String>,
    },
    /// The router's reply to `Register`, carrying the assigned id.
    Registered {
        node_id: String,
    },
    Deregister {
        node_id: String,
    },
    Heartbeat {
        node_id: String,
    },
    UpdateMetadata {
        node_id: String,
        metadata: HashMap<String, String>,
    },
    /// Deliver `payload` to exactly one node.
    Unicast {
        to: String,
        payload: Vec<u8>,
    },
    /// Deliver `payload` to every online member of `group`, excluding the
    /// sender.
    Multicast {
        group: String,
        payload: Vec<u8>,
    },
    /// Deliver `payload` to every other online node.
    Broadcast {
        payload: Vec<u8>,
    },
    /// A message actually delivered to this connection, as the result of a
    /// unicast, multicast or broadcast sent by some other node.
    Deliver {
        from: Option<String>,
        payload: Vec<u8>,
    },
    /// A correlated request addressed to `to`, awaiting a
    /// [`RouterMessage::Response`] within `timeout_ms`.
    Request {
        id: u64,
        to: String,
        payload: Vec<u8>,
        timeout_ms: u64,
    },
    Response {
        id: u64,
        payload: Vec<u8>,
        success: bool,
        error_message: Option<String>,
    },
    /// Sent back to the sender when a unicast/multicast/broadcast or
    /// subscribe could not be honored (e.g. the target is not connected).
    Error {
        message: String,
    },
    Subscribe {
        topic: String,
    },
    Unsubscribe {
        topic: String,
    },
    Event {
        topic: String,
        payload: Vec<u8>,
    },
}

/// Structured events the router emits on the `presence` topic as the
/// underlying state transitions occur.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RouterEvent {
    ClientConnected {
        node_id: String,
    },
    ClientDisconnected {
        node_id: String,
        reason: Option<String>,
    },
    CapabilitiesUpdated {
        node_id: String,
        metadata: HashMap<String, String>,
    },
    TopologyChanged {
        active_clients: usize,
        ids: Vec<String>,
        groups: Vec<String>,
    },
}

const PRESENCE_TOPIC: &str = "presence";

struct Connection {
    sink: Arc<ResponseSink<RouterMessage>>,
}

/// Shared router state: presence, the pub/sub distributor, live connections
/// and in-flight request/response correlation. One instance backs exactly
/// one `Router/Connect` method and is the single source of truth for
/// delivery even if its contract is registered on more than one
/// transport/endpoint; `connections` plays both roles at once since nothing
/// here distinguishes a per-endpoint cache from the process-wide map.
pub struct RouterCore {
    presence: PresenceRegistry,
    distributor: Arc<EventDistributor>,
    connections: PLMutex<HashMap<String, Connection>>,
    pending_requests: PLMutex<HashMap<u64, oneshot::Sender<RouterMessage>>>,
    next_client_id: AtomicU64,
}

pub struct RouterConfig {
    pub zombie_timeout: Duration,
    pub event_buffer_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            zombie_timeout: Duration::from_secs(30),
            event_buffer_capacity: 256,
        }
    }
}

impl RouterCore {
    pub fn new(config: RouterConfig) -> Arc<Self> {
        Arc::new(RouterCore {
            presence: PresenceRegistry::new(config.zombie_timeout),
            distributor: EventDistributor::new(config.event_buffer_capacity, config.zombie_timeout),
            connections: PLMutex::new(HashMap::new()),
            pending_requests: PLMutex::new(HashMap::new()),
            next_client_id: AtomicU64::new(1),
        })
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn distributor(&self) -> &Arc<EventDistributor> {
        &self.distributor
    }

    /// Builds the `Router` service contract (one method, `Connect`) bound to
    /// this core. Register the result with a [`rapace_core::Registry`]
    /// before constructing the endpoint that serves it.
    pub fn contract(self: &Arc<Self>) -> ServiceContract {
        let core = self.clone();
        let handler: Arc<dyn Handler> = bidi_handler(
            Arc::new(rapace_core::SerdeCodec::<RouterMessage>::postcard()),
            Arc::new(rapace_core::SerdeCodec::<RouterMessage>::postcard()),
            move |requests, responses| {
                let core = core.clone();
                async move { core.drive_connection(requests, responses).await }
            },
        );
        let mut contract = ServiceContract::new("Router");
        contract.add_method("Connect", handler);
        contract
    }

    fn publish_event(&self, event: RouterEvent) {
        match postcard::to_allocvec(&event) {
            Ok(bytes) => {
                self.distributor.publish(PRESENCE_TOPIC, bytes::Bytes::from(bytes));
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode router event"),
        }
    }

    fn emit_topology_changed(&self) {
        let entries = self.presence.list();
        let ids: Vec<String> = entries.iter().map(|e| e.node_id.clone()).collect();
        let mut groups: Vec<String> = entries.iter().flat_map(|e| e.groups.clone()).collect();
        groups.sort();
        groups.dedup();
        self.publish_event(RouterEvent::TopologyChanged {
            active_clients: ids.len(),
            ids,
            groups,
        });
    }

    /// Removes `node_id`'s presence record and connection, and — unless it
    /// was already gone — emits `clientDisconnected(reason)` and a refreshed
    /// topology snapshot. Safe to call more than once for the same id.
    fn finish_disconnect(&self, node_id: &str, reason: Option<String>) {
        let was_present = self.presence.deregister(node_id);
        self.connections.lock().remove(node_id);
        if was_present {
            self.publish_event(RouterEvent::ClientDisconnected {
                node_id: node_id.to_string(),
                reason,
            });
            self.emit_topology_changed();
        }
    }

    /// Spawns the periodic sweep implementing the three health-check
    /// outcomes: inactivity-timeout disconnect, online-to-idle transition at
    /// `2 * interval`, and the zombie dual check against the connection map
    /// (a presence record with no live outbound stream).
    pub fn spawn_health_check(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let core = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;

                for node_id in core.presence.evict_expired() {
                    core.finish_disconnect(&node_id, Some("Inactivity timeout".to_string()));
                }

                core.presence.mark_idle(interval * 2);

                let live_ids: HashSet<String> = core.connections.lock().keys().cloned().collect();
                for node_id in core.presence.evict_not_in(&live_ids) {
                    core.finish_disconnect(&node_id, Some("Zombie connection cleanup".to_string()));
                }

                core.distributor.evict_inactive();
            }
        })
    }

    async fn drive_connection(
        self: Arc<Self>,
        requests: RequestStream<RouterMessage>,
        responses: ResponseSink<RouterMessage>,
    ) -> Status {
        let responses = Arc::new(responses);
        let mut node_id: Option<String> = None;
        let mut subscriptions: Vec<JoinHandle<()>> = Vec::new();

        loop {
            match requests.next().await {
                Some(Ok(message)) => {
                    if let Err(status) = self
                        .clone()
                        .handle_message(&mut node_id, message, &responses, &mut subscriptions)
                        .await
                    {
                        for handle in subscriptions {
                            handle.abort();
                        }
                        self.disconnect(node_id.as_deref(), "Connection error");
                        return status;
                    }
                }
                Some(Err(status)) => {
                    for handle in subscriptions {
                        handle.abort();
                    }
                    self.disconnect(node_id.as_deref(), "Connection error");
                    return status;
                }
                None => break,
            }
        }

        for handle in subscriptions {
            handle.abort();
        }
        self.disconnect(node_id.as_deref(), "Connection closed");
        Status::ok()
    }

    fn disconnect(&self, node_id: Option<&str>, reason: &str) {
        if let Some(id) = node_id {
            self.finish_disconnect(id, Some(reason.to_string()));
        }
    }

    async fn handle_message(
        self: Arc<Self>,
        node_id: &mut Option<String>,
        message: RouterMessage,
        responses: &Arc<ResponseSink<RouterMessage>>,
        subscriptions: &mut Vec<JoinHandle<()>>,
    ) -> Result<(), Status> {
        match message {
            RouterMessage::Register { client_name, groups, metadata } => {
                let id = format!("client-{}", self.next_client_id.fetch_add(1, Ordering::Relaxed));
                self.presence.register(id.clone(), client_name, groups, metadata);
                self.connections.lock().insert(
                    id.clone(),
                    Connection {
                        sink: responses.clone(),
                    },
                );
                *node_id = Some(id.clone());
                let _ = responses.send(RouterMessage::Registered { node_id: id.clone() }).await;
                self.publish_event(RouterEvent::ClientConnected { node_id: id });
                self.emit_topology_changed();
            }
            RouterMessage::Deregister { node_id: id } => {
                self.finish_disconnect(&id, Some("Deregistered".to_string()));
                if node_id.as_deref() == Some(id.as_str()) {
                    *node_id = None;
                }
            }
            RouterMessage::Heartbeat { node_id: id } => {
                if !self.presence.heartbeat(&id) {
                    return Err(Status::new(
                        StatusCode::NotFound,
                        "heartbeat for unregistered node",
                    ));
                }
            }
            RouterMessage::UpdateMetadata { node_id: id, metadata } => {
                if self.presence.update_metadata(&id, metadata.clone()) {
                    self.publish_event(RouterEvent::CapabilitiesUpdated { node_id: id, metadata });
                }
            }
            RouterMessage::Unicast { to, payload } => {
                if let Some(id) = node_id.as_deref() {
                    self.presence.touch(id);
                }
                if !self.deliver_to(&to, node_id.clone(), payload).await {
                    let _ = responses
                        .send(RouterMessage::Error {
                            message: format!("unicast target {to:?} is not connected"),
                        })
                        .await;
                }
            }
            RouterMessage::Multicast { group, payload } => {
                let targets = self.presence.online_members_of_group(&group, node_id.as_deref());
                for target in targets {
                    self.deliver_to(&target, node_id.clone(), payload.clone()).await;
                }
            }
            RouterMessage::Broadcast { payload } => {
                let targets = self.presence.online_ids(node_id.as_deref());
                for target in targets {
                    self.deliver_to(&target, node_id.clone(), payload.clone()).await;
                }
            }
            RouterMessage::Request { id: request_id, to, payload, timeout_ms } => {
                self.clone()
                    .route_request(request_id, node_id.clone(), to, payload, Duration::from_millis(timeout_ms));
            }
            RouterMessage::Response { id: request_id, payload, success, error_message } => {
                if let Some(tx) = self.pending_requests.lock().remove(&request_id) {
                    let _ = tx.send(RouterMessage::Response {
                        id: request_id,
                        payload,
                        success,
                        error_message,
                    });
                }
            }
            RouterMessage::Subscribe { topic } => match self.distributor.subscribe(topic.clone()) {
                Ok(subscriber) => {
                    let responses = responses.clone();
                    subscriptions.push(tokio::spawn(async move {
                        loop {
                            let payload = subscriber.recv().await;
                            if responses
                                .send(RouterMessage::Event {
                                    topic: subscriber.topic().to_string(),
                                    payload: payload.to_vec(),
                                })
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                    }));
                }
                Err(status) => {
                    let _ = responses.send(RouterMessage::Error { message: status.message }).await;
                }
            },
            RouterMessage::Unsubscribe { .. } => {
                // Subscriptions are torn down via their JoinHandle on disconnect;
                // an explicit unsubscribe mid-session is not yet wired to a
                // specific handle here, since nothing currently needs it.
            }
            RouterMessage::Error { message } => {
                tracing::warn!(node_id = ?node_id, message, "peer reported a router error");
            }
            RouterMessage::Registered { .. } | RouterMessage::Deliver { .. } | RouterMessage::Event { .. } => {
                // These only ever flow server -> client; a well-behaved peer
                // never sends them back to us.
            }
        }
        Ok(())
    }

    /// Delivers `payload` to `to`'s connection if it has one. Returns
    /// whether delivery happened.
    async fn deliver_to(&self, to: &str, from: Option<String>, payload: Vec<u8>) -> bool {
        let sink = self.connections.lock().get(to).map(|c| c.sink.clone());
        match sink {
            Some(sink) => sink.send(RouterMessage::Deliver { from, payload }).await.is_ok(),
            None => false,
        }
    }

    fn route_request(
        self: Arc<Self>,
        request_id: u64,
        from: Option<String>,
        to: String,
        payload: Vec<u8>,
        timeout: Duration,
    ) {
        let sink = self.connections.lock().get(&to).map(|c| c.sink.clone());
        let reply_to = from.clone().and_then(|id| self.connections.lock().get(&id).map(|c| c.sink.clone()));

        let Some(sink) = sink else {
            tokio::spawn(async move {
                if let Some(reply_to) = reply_to {
                    let _ = reply_to
                        .send(RouterMessage::Response {
                            id: request_id,
                            payload: Vec::new(),
                            success: false,
                            error_message: Some(format!("request target {to:?} is not connected")),
                        })
                        .await;
                }
            });
            return;
        };

        let (tx, rx) = oneshot::channel();
        self.pending_requests.lock().insert(request_id, tx);

        let core = self;

        tokio::spawn(async move {
            let sent = sink
                .send(RouterMessage::Request {
                    id: request_id,
                    to: from.unwrap_or_default(),
                    payload,
                    timeout_ms: timeout.as_millis() as u64,
                })
                .await
                .is_ok();

            let response = if !sent {
                core.pending_requests.lock().remove(&request_id);
                RouterMessage::Response {
                    id: request_id,
                    payload: Vec::new(),
                    success: false,
                    error_message: Some(format!("request target {to:?} disconnected")),
                }
            } else {
                match tokio::time::timeout(timeout, rx).await {
                    Ok(Ok(response)) => response,
                    _ => {
                        core.pending_requests.lock().remove(&request_id);
                        RouterMessage::Response {
                            id: request_id,
                            payload: Vec::new(),
                            success: false,
                            error_message: Some("Request timeout".to_string()),
                        }
                    }
                }
            };

            if let Some(reply_to) = reply_to {
                let _ = reply_to.send(response).await;
            }
        });
    }
}
