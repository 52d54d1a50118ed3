//! One endpoint owns exactly one transport and one immutable method
//! registry. Construction spawns the single task that consumes the
//! transport's inbound sequence and demultiplexes it by stream id, either
//! to an in-flight call's event channel or, for a brand new stream carrying
//! a method path, to a freshly spawned handler invocation.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::Mutex as PLMutex;
use rapace_wire::{FrameParser, Metadata, Status, StatusCode, GRPC_STATUS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::call::{BidiCall, CallEvent, ClientStreamingCaller, HandlerCtx, RawCall, ServerStreamingCaller, StreamMap, UnaryCaller};
use crate::codec::Codec;
use crate::contract::Registry;
use crate::transport::{Inbound, InboundBody, Transport};

/// A peer-to-peer RPC endpoint: one transport, one registry, one dispatch
/// loop. Both calling out and serving incoming calls happen through the
/// same object, since either side of a transport may initiate calls.
pub struct Endpoint {
    transport: Transport,
    registry: Arc<Registry>,
    streams: StreamMap,
    closed: Arc<AtomicBool>,
    dispatch_handle: PLMutex<Option<JoinHandle<()>>>,
}

impl Endpoint {
    /// Builds an endpoint over `transport` dispatching against `registry`,
    /// and immediately starts consuming inbound frames. The registry is
    /// immutable from this point on; registration only happens before
    /// `serve` is called.
    pub fn serve(transport: Transport, registry: Registry) -> Arc<Self> {
        let endpoint = Arc::new(Endpoint {
            transport,
            registry: Arc::new(registry),
            streams: Arc::new(PLMutex::new(HashMap::new())),
            closed: Arc::new(AtomicBool::new(false)),
            dispatch_handle: PLMutex::new(None),
        });

        let loop_endpoint = endpoint.clone();
        let handle = tokio::spawn(async move { loop_endpoint.run_dispatch_loop().await });
        *endpoint.dispatch_handle.lock() = Some(handle);
        endpoint
    }

    /// Stops accepting new inbound work and closes the underlying
    /// transport. In-flight handler tasks observe the closed transport the
    /// next time they try to send and fail with UNAVAILABLE.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.transport.close();
        if let Some(handle) = self.dispatch_handle.lock().take() {
            handle.abort();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn unary<Req, Resp>(
        &self,
        service: impl Into<String>,
        method: impl Into<String>,
        req_codec: Arc<dyn Codec<Req> + Send + Sync>,
        resp_codec: Arc<dyn Codec<Resp> + Send + Sync>,
    ) -> UnaryCaller<Req, Resp> {
        UnaryCaller {
            transport: self.transport.clone(),
            streams: self.streams.clone(),
            service: service.into(),
            method: method.into(),
            req_codec,
            resp_codec,
        }
    }

    pub fn server_streaming<Req, Resp>(
        &self,
        service: impl Into<String>,
        method: impl Into<String>,
        req_codec: Arc<dyn Codec<Req> + Send + Sync>,
        resp_codec: Arc<dyn Codec<Resp> + Send + Sync>,
    ) -> ServerStreamingCaller<Req, Resp> {
        ServerStreamingCaller {
            transport: self.transport.clone(),
            streams: self.streams.clone(),
            service: service.into(),
            method: method.into(),
            req_codec,
            resp_codec,
        }
    }

    pub fn client_streaming<Req, Resp>(
        &self,
        service: impl Into<String>,
        method: impl Into<String>,
        req_codec: Arc<dyn Codec<Req> + Send + Sync>,
        resp_codec: Arc<dyn Codec<Resp> + Send + Sync>,
    ) -> ClientStreamingCaller<Req, Resp> {
        ClientStreamingCaller {
            transport: self.transport.clone(),
            streams: self.streams.clone(),
            service: service.into(),
            method: method.into(),
            req_codec,
            resp_codec,
        }
    }

    pub async fn bidi<Req: Send + 'static, Resp: Send + 'static>(
        &self,
        service: impl Into<String>,
        method: impl Into<String>,
        req_codec: Arc<dyn Codec<Req> + Send + Sync>,
        resp_codec: Arc<dyn Codec<Resp> + Send + Sync>,
    ) -> Result<BidiCall<Req, Resp>, Status> {
        BidiCall::open(
            &self.transport,
            &self.streams,
            &service.into(),
            &method.into(),
            req_codec,
            resp_codec,
        )
        .await
    }

    async fn run_dispatch_loop(self: Arc<Self>) {
        let mut parsers: HashMap<u32, FrameParser> = HashMap::new();

        loop {
            let inbound = match self.transport.recv().await {
                Ok(inbound) => inbound,
                Err(_) => break,
            };
            self.handle_inbound(inbound, &mut parsers).await;
        }
    }

    async fn handle_inbound(self: &Arc<Self>, inbound: Inbound, parsers: &mut HashMap<u32, FrameParser>) {
        let stream_id = inbound.stream_id;
        let end_of_stream = inbound.end_of_stream;

        let existing_tx = self.streams.lock().get(&stream_id).cloned();

        if let Some(tx) = existing_tx {
            match inbound.body {
                InboundBody::Metadata(metadata) => {
                    let event = if metadata.get(GRPC_STATUS).is_some() {
                        CallEvent::Trailer(metadata)
                    } else {
                        CallEvent::Metadata(metadata)
                    };
                    let _ = tx.send(event).await;
                }
                InboundBody::Payload(bytes) => {
                    let parser = parsers.entry(stream_id).or_default();
                    match parser.feed(&bytes) {
                        Ok(frames) => {
                            for frame in frames {
                                if frame.compressed {
                                    tracing::warn!(stream_id, "rejecting compressed frame, no codec negotiated");
                                    self.streams.lock().remove(&stream_id);
                                    parsers.remove(&stream_id);
                                    let trailer = Metadata::for_trailer(
                                        StatusCode::Unimplemented,
                                        Some("compressed frames are not supported"),
                                    );
                                    let _ = tx.send(CallEvent::Trailer(trailer)).await;
                                    self.transport.release_stream_id(stream_id);
                                    return;
                                }
                                let _ = tx.send(CallEvent::Message(frame.payload)).await;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(stream_id, error = %e, "dropping malformed frame");
                        }
                    }
                }
            }
            if end_of_stream {
                self.streams.lock().remove(&stream_id);
                parsers.remove(&stream_id);
            }
            return;
        }

        // No in-flight call for this stream: must be a new inbound call.
        let method_path = match &inbound.body {
            InboundBody::Metadata(_) => inbound.method_path.clone(),
            InboundBody::Payload(_) => None,
        };

        let Some(method_path) = method_path else {
            tracing::error!(stream_id, "frame for unknown stream carries no method path");
            self.reject(stream_id, StatusCode::Internal, "protocol violation: unknown stream").await;
            return;
        };

        let Some((service, method)) = parse_method_path(&method_path) else {
            self.reject(stream_id, StatusCode::Internal, "malformed method path").await;
            return;
        };

        let handler = match self.registry.get(&service, &method) {
            Some(handler) => handler.clone(),
            None => {
                self.reject(stream_id, StatusCode::Unimplemented, "method not found").await;
                return;
            }
        };

        let (tx, rx) = mpsc::channel(64);
        self.streams.lock().insert(stream_id, tx);

        let transport = self.transport.clone();
        let streams = self.streams.clone();

        tokio::spawn(async move {
            if transport
                .send_metadata(stream_id, Metadata::for_server_initial_response(), None, false)
                .await
                .is_err()
            {
                streams.lock().remove(&stream_id);
                return;
            }

            let ctx = HandlerCtx::new(RawCall::from_registered(
                transport.clone(),
                stream_id,
                streams.clone(),
                rx,
            ));

            let status = match AssertUnwindSafe(handler.invoke(ctx)).catch_unwind().await {
                Ok(status) => status,
                Err(_) => {
                    tracing::error!(stream_id, "handler panicked");
                    Status::new(StatusCode::Internal, "internal error")
                }
            };

            let trailer = Metadata::for_trailer(status.code, Some(&status.message));
            let _ = transport.send_metadata(stream_id, trailer, None, true).await;
            streams.lock().remove(&stream_id);
            transport.release_stream_id(stream_id);
        });
    }

    async fn reject(&self, stream_id: u32, code: StatusCode, message: &str) {
        let trailer = Metadata::for_trailer(code, Some(message));
        let _ = self
            .transport
            .send_metadata(stream_id, trailer, None, true)
            .await;
        self.transport.release_stream_id(stream_id);
    }
}

fn parse_method_path(path: &str) -> Option<(String, String)> {
    let trimmed = path.strip_prefix('/')?;
    let (service, method) = trimmed.split_once('/')?;
    if service.is_empty() || method.is_empty() {
        return None;
    }
    Some((service.to_string(), method.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::unary_handler;
    use crate::codec::SerdeCodec;
    use crate::contract::{Registry, ServiceContract};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct EchoRequest {
        text: String,
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct EchoResponse {
        text: String,
    }

    fn echo_registry() -> Registry {
        let handler = unary_handler(
            Arc::new(SerdeCodec::<EchoRequest>::postcard()),
            Arc::new(SerdeCodec::<EchoResponse>::postcard()),
            |req: EchoRequest| async move {
                Ok(EchoResponse { text: req.text }) as Result<EchoResponse, Status>
            },
        );
        let mut contract = ServiceContract::new("Echo");
        contract.add_method("Say", handler);
        let mut builder = Registry::builder();
        builder.register(&contract).unwrap();
        builder.build()
    }

    #[tokio::test]
    async fn unary_round_trip_over_mem_transport() {
        let (client_transport, server_transport) = Transport::mem_pair();
        let server = Endpoint::serve(server_transport, echo_registry());
        let client = Endpoint::serve(client_transport, Registry::builder().build());

        let caller = client.unary::<EchoRequest, EchoResponse>(
            "Echo",
            "Say",
            Arc::new(SerdeCodec::postcard()),
            Arc::new(SerdeCodec::postcard()),
        );

        let response = caller
            .call(
                EchoRequest {
                    text: "hello".to_string(),
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(response.text, "hello");

        client.close();
        server.close();
    }

    #[tokio::test]
    async fn unknown_method_yields_unimplemented() {
        let (client_transport, server_transport) = Transport::mem_pair();
        let server = Endpoint::serve(server_transport, Registry::builder().build());
        let client = Endpoint::serve(client_transport, Registry::builder().build());

        let caller = client.unary::<EchoRequest, EchoResponse>(
            "Echo",
            "Missing",
            Arc::new(SerdeCodec::postcard()),
            Arc::new(SerdeCodec::postcard()),
        );

        let err = caller
            .call(
                EchoRequest {
                    text: "hi".to_string(),
                },
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, StatusCode::Unimplemented);

        client.close();
        server.close();
    }

    #[tokio::test]
    async fn compressed_frame_is_rejected_with_unimplemented() {
        let (client_transport, server_transport) = Transport::mem_pair();
        let server = Endpoint::serve(server_transport, echo_registry());

        let stream_id = client_transport.create_stream().unwrap();
        client_transport
            .send_metadata(
                stream_id,
                Metadata::for_client_request("Echo", "Say", None),
                Some("/Echo/Say".to_string()),
                false,
            )
            .await
            .unwrap();
        client_transport
            .send_message(stream_id, rapace_wire::encode_frame(b"hello", true), true)
            .await
            .unwrap();

        // First inbound event is the server's initial response metadata.
        let _initial = client_transport.recv().await.unwrap();
        let trailer = client_transport.recv().await.unwrap();
        match trailer.body {
            InboundBody::Metadata(metadata) => {
                assert_eq!(metadata.get(rapace_wire::GRPC_STATUS), Some("12"));
            }
            InboundBody::Payload(_) => panic!("expected a trailer, got a payload frame"),
        }

        server.close();
    }

    #[test]
    fn parses_well_formed_method_path() {
        assert_eq!(
            parse_method_path("/Echo/Say"),
            Some(("Echo".to_string(), "Say".to_string()))
        );
    }

    #[test]
    fn rejects_malformed_method_path() {
        assert_eq!(parse_method_path("Echo/Say"), None);
        assert_eq!(parse_method_path("/Echo"), None);
        assert_eq!(parse_method_path("//Say"), None);
    }
}
