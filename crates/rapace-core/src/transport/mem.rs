//! In-memory transport: a connected pair of queues used by every test in
//! this workspace and by same-process peers that don't need a real socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use rapace_wire::Metadata;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::stream_id::{Role, StreamIdManager};
use crate::transport::{Inbound, InboundBody, TransportBackend};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
enum WireMsg {
    Metadata {
        stream_id: u32,
        metadata: Metadata,
        method_path: Option<String>,
        end_of_stream: bool,
    },
    Message {
        stream_id: u32,
        framed_payload: Bytes,
        end_of_stream: bool,
    },
}

#[derive(Clone)]
pub struct MemTransport {
    inner: Arc<Inner>,
}

struct Inner {
    tx: mpsc::Sender<WireMsg>,
    rx: tokio::sync::Mutex<mpsc::Receiver<WireMsg>>,
    closed: AtomicBool,
    ids: StreamIdManager,
}

impl MemTransport {
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(CHANNEL_CAPACITY);
        let (tx_b, rx_b) = mpsc::channel(CHANNEL_CAPACITY);

        let a = MemTransport {
            inner: Arc::new(Inner {
                tx: tx_b,
                rx: tokio::sync::Mutex::new(rx_a),
                closed: AtomicBool::new(false),
                ids: StreamIdManager::new(Role::Initiator),
            }),
        };
        let b = MemTransport {
            inner: Arc::new(Inner {
                tx: tx_a,
                rx: tokio::sync::Mutex::new(rx_b),
                closed: AtomicBool::new(false),
                ids: StreamIdManager::new(Role::Acceptor),
            }),
        };
        (a, b)
    }

    fn check_open(&self) -> Result<(), TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

impl TransportBackend for MemTransport {
    fn create_stream(&self) -> Result<u32, TransportError> {
        self.inner
            .ids
            .allocate()
            .map_err(|_| TransportError::Closed)
    }

    async fn send_metadata(
        &self,
        stream_id: u32,
        metadata: Metadata,
        method_path: Option<String>,
        end_of_stream: bool,
    ) -> Result<(), TransportError> {
        self.check_open()?;
        self.inner
            .tx
            .send(WireMsg::Metadata {
                stream_id,
                metadata,
                method_path,
                end_of_stream,
            })
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn send_message(
        &self,
        stream_id: u32,
        framed_payload: Bytes,
        end_of_stream: bool,
    ) -> Result<(), TransportError> {
        self.check_open()?;
        self.inner
            .tx
            .send(WireMsg::Message {
                stream_id,
                framed_payload,
                end_of_stream,
            })
            .await
            .map_err(|_| TransportError::Closed)
    }

    fn release_stream_id(&self, stream_id: u32) -> bool {
        self.inner.ids.release(stream_id)
    }

    async fn recv(&self) -> Result<Inbound, TransportError> {
        self.check_open()?;
        let msg = {
            let mut rx = self.inner.rx.lock().await;
            rx.recv().await.ok_or(TransportError::Closed)?
        };

        Ok(match msg {
            WireMsg::Metadata {
                stream_id,
                metadata,
                method_path,
                end_of_stream,
            } => {
                self.inner.ids.observe(stream_id);
                Inbound {
                    stream_id,
                    body: InboundBody::Metadata(metadata),
                    end_of_stream,
                    method_path,
                }
            }
            WireMsg::Message {
                stream_id,
                framed_payload,
                end_of_stream,
            } => {
                self.inner.ids.observe(stream_id);
                Inbound {
                    stream_id,
                    body: InboundBody::Payload(framed_payload),
                    end_of_stream,
                    method_path: None,
                }
            }
        })
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_assigns_opposite_parity() {
        let (a, b) = MemTransport::pair();
        assert_eq!(a.create_stream().unwrap(), 1);
        assert_eq!(b.create_stream().unwrap(), 2);
        assert_eq!(a.create_stream().unwrap(), 3);
    }

    #[tokio::test]
    async fn send_is_observed_on_the_other_side() {
        let (a, b) = MemTransport::pair();
        let id = a.create_stream().unwrap();
        a.send_metadata(id, Metadata::new(), Some("/Echo/Say".into()), false)
            .await
            .unwrap();

        let inbound = b.recv().await.unwrap();
        assert_eq!(inbound.stream_id, id);
        assert_eq!(inbound.method_path.as_deref(), Some("/Echo/Say"));
        assert!(!inbound.end_of_stream);
    }

    #[tokio::test]
    async fn closed_transport_rejects_sends() {
        let (a, _b) = MemTransport::pair();
        a.close();
        let err = a
            .send_metadata(1, Metadata::new(), None, false)
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Closed);
    }
}
