//! Transport contract: the abstract duplex channel the call primitives and
//! endpoint are built on. The public API is the [`Transport`] enum; each
//! backend implements the internal [`TransportBackend`] trait and is added
//! as a variant, forwarded without handwritten `match` boilerplate via
//! `enum_dispatch`. Only the in-memory backend is implemented here — it is
//! the reference transport every test in this workspace runs against.
//! WebSocket/HTTP-2/isolate backends can implement the same trait outside
//! this crate; nothing above this layer touches transport-specific state.

#[cfg(feature = "mem")]
pub mod mem;

use bytes::Bytes;
use enum_dispatch::enum_dispatch;
use rapace_wire::Metadata;

use crate::error::TransportError;

/// One inbound event, already demultiplexed to a stream id.
#[derive(Debug, Clone)]
pub enum InboundBody {
    Metadata(Metadata),
    Payload(Bytes),
}

#[derive(Debug, Clone)]
pub struct Inbound {
    pub stream_id: u32,
    pub body: InboundBody,
    pub end_of_stream: bool,
    /// Only ever populated on the very first metadata frame of a stream.
    pub method_path: Option<String>,
}

#[enum_dispatch]
pub(crate) trait TransportBackend: Send + Sync + Clone + 'static {
    fn create_stream(&self) -> Result<u32, TransportError>;
    async fn send_metadata(
        &self,
        stream_id: u32,
        metadata: Metadata,
        method_path: Option<String>,
        end_of_stream: bool,
    ) -> Result<(), TransportError>;
    async fn send_message(
        &self,
        stream_id: u32,
        framed_payload: Bytes,
        end_of_stream: bool,
    ) -> Result<(), TransportError>;
    fn release_stream_id(&self, stream_id: u32) -> bool;
    async fn recv(&self) -> Result<Inbound, TransportError>;
    fn close(&self);
    fn is_closed(&self) -> bool;
}

#[enum_dispatch(TransportBackend)]
#[derive(Clone)]
pub enum Transport {
    #[cfg(feature = "mem")]
    Mem(mem::MemTransport),
}

impl Transport {
    #[cfg(feature = "mem")]
    pub fn mem_pair() -> (Self, Self) {
        let (a, b) = mem::MemTransport::pair();
        (Transport::Mem(a), Transport::Mem(b))
    }

    pub fn create_stream(&self) -> Result<u32, TransportError> {
        TransportBackend::create_stream(self)
    }

    pub async fn send_metadata(
        &self,
        stream_id: u32,
        metadata: Metadata,
        method_path: Option<String>,
        end_of_stream: bool,
    ) -> Result<(), TransportError> {
        TransportBackend::send_metadata(self, stream_id, metadata, method_path, end_of_stream)
            .await
    }

    pub async fn send_message(
        &self,
        stream_id: u32,
        framed_payload: Bytes,
        end_of_stream: bool,
    ) -> Result<(), TransportError> {
        TransportBackend::send_message(self, stream_id, framed_payload, end_of_stream).await
    }

    /// Sends an empty trailer with end-of-stream. Idempotent: sending on an
    /// already half-closed stream is a no-op from the caller's perspective
    /// because the backend simply enqueues another (harmless) empty frame.
    pub async fn finish_sending(&self, stream_id: u32) -> Result<(), TransportError> {
        self.send_message(stream_id, Bytes::new(), true).await
    }

    pub fn release_stream_id(&self, stream_id: u32) -> bool {
        TransportBackend::release_stream_id(self, stream_id)
    }

    pub async fn recv(&self) -> Result<Inbound, TransportError> {
        TransportBackend::recv(self).await
    }

    pub fn close(&self) {
        TransportBackend::close(self)
    }

    pub fn is_closed(&self) -> bool {
        TransportBackend::is_closed(self)
    }
}
