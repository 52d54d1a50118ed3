//! Call shapes: unary, server-streaming, client-streaming and bidirectional,
//! all built on one underlying duplex stream ([`RawCall`]). A stream always
//! carries frames in the same order: optional metadata, zero or more
//! messages, a trailer. The four shapes differ only in how many messages
//! flow in each direction and how the typed wrappers below present that to
//! callers and handlers.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use rapace_wire::{Metadata, Status, StatusCode, GRPC_STATUS};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::codec::Codec;
use crate::error::TransportError;
use crate::transport::Transport;

/// Which of the four call shapes a method implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodType {
    Unary,
    ServerStreaming,
    ClientStreaming,
    Bidirectional,
}

/// One event arriving on a call's stream, already demultiplexed from the
/// transport and, for data, already split into individual message frames.
#[derive(Debug)]
pub(crate) enum CallEvent {
    /// Informational headers (the server's initial response metadata, on
    /// the caller side). Carries no status and is not the end of the call.
    Metadata(Metadata),
    /// One decoded message payload, still codec-encoded bytes.
    Message(Bytes),
    /// Closing metadata: always carries `grpc-status`.
    Trailer(Metadata),
}

pub(crate) type StreamMap = Arc<Mutex<HashMap<u32, mpsc::Sender<CallEvent>>>>;

fn transport_err_to_status(_: TransportError) -> Status {
    Status::new(StatusCode::Unavailable, "transport closed")
}

fn status_from_trailer(trailer: &Metadata) -> Status {
    let code = trailer
        .get(GRPC_STATUS)
        .and_then(|v| v.parse::<i32>().ok())
        .map(StatusCode::from_i32)
        .unwrap_or(StatusCode::Unknown);
    let message = trailer
        .get(rapace_wire::GRPC_MESSAGE)
        .unwrap_or("")
        .to_string();
    Status::new(code, message)
}

/// The raw, untyped duplex primitive every call shape is built on. Knows
/// nothing about message codecs; it moves already-encoded bytes.
pub(crate) struct RawCall {
    transport: Transport,
    stream_id: u32,
    streams: StreamMap,
    rx: tokio::sync::Mutex<mpsc::Receiver<CallEvent>>,
}

impl RawCall {
    const EVENT_CHANNEL_CAPACITY: usize = 64;

    /// Caller side: allocate a stream id, register its event channel, and
    /// send the initial request metadata carrying the method path.
    pub(crate) async fn open(
        transport: &Transport,
        streams: &StreamMap,
        service: &str,
        method: &str,
    ) -> Result<Self, Status> {
        let stream_id = transport
            .create_stream()
            .map_err(transport_err_to_status)?;
        let (tx, rx) = mpsc::channel(Self::EVENT_CHANNEL_CAPACITY);
        streams.lock().insert(stream_id, tx);

        let metadata = Metadata::for_client_request(service, method, None);
        let method_path = format!("/{service}/{method}");
        transport
            .send_metadata(stream_id, metadata, Some(method_path), false)
            .await
            .map_err(transport_err_to_status)?;

        Ok(RawCall {
            transport: transport.clone(),
            stream_id,
            streams: streams.clone(),
            rx: tokio::sync::Mutex::new(rx),
        })
    }

    /// Responder side: wrap a receiver the dispatch loop already registered.
    pub(crate) fn from_registered(
        transport: Transport,
        stream_id: u32,
        streams: StreamMap,
        rx: mpsc::Receiver<CallEvent>,
    ) -> Self {
        RawCall {
            transport,
            stream_id,
            streams,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    pub(crate) async fn send_payload(&self, body: Vec<u8>, end_of_stream: bool) -> Result<(), Status> {
        let framed = rapace_wire::encode_frame(&body, false);
        self.transport
            .send_message(self.stream_id, framed, end_of_stream)
            .await
            .map_err(transport_err_to_status)
    }

    pub(crate) async fn finish_sending(&self) -> Result<(), Status> {
        self.transport
            .finish_sending(self.stream_id)
            .await
            .map_err(transport_err_to_status)
    }

    pub(crate) async fn recv_event(&self) -> Option<CallEvent> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }

    /// Collects exactly the next message, ignoring informational metadata,
    /// stopping at the trailer. Used by shapes that expect a single response.
    async fn recv_one_message(&self) -> Result<Option<Bytes>, Status> {
        loop {
            match self.recv_event().await {
                Some(CallEvent::Message(bytes)) => return Ok(Some(bytes)),
                Some(CallEvent::Metadata(_)) => continue,
                Some(CallEvent::Trailer(trailer)) => {
                    let status = status_from_trailer(&trailer);
                    return if status.is_ok() {
                        Ok(None)
                    } else {
                        Err(status)
                    };
                }
                None => return Err(Status::new(StatusCode::Unavailable, "transport closed")),
            }
        }
    }
}

impl Drop for RawCall {
    fn drop(&mut self) {
        self.streams.lock().remove(&self.stream_id);
        self.transport.release_stream_id(self.stream_id);
    }
}

async fn with_deadline<T>(
    deadline: Option<Duration>,
    fut: impl Future<Output = Result<T, Status>>,
) -> Result<T, Status> {
    match deadline {
        Some(d) => match tokio::time::timeout(d, fut).await {
            Ok(result) => result,
            Err(_) => Err(Status::new(StatusCode::DeadlineExceeded, "deadline exceeded")),
        },
        None => fut.await,
    }
}

/// A single-request, single-response call.
pub struct UnaryCaller<Req, Resp> {
    pub(crate) transport: Transport,
    pub(crate) streams: StreamMap,
    pub(crate) service: String,
    pub(crate) method: String,
    pub(crate) req_codec: Arc<dyn Codec<Req> + Send + Sync>,
    pub(crate) resp_codec: Arc<dyn Codec<Resp> + Send + Sync>,
}

impl<Req: Send + 'static, Resp: Send + 'static> UnaryCaller<Req, Resp> {
    pub async fn call(&self, request: Req, deadline: Option<Duration>) -> Result<Resp, Status> {
        with_deadline(deadline, async {
            let call = RawCall::open(&self.transport, &self.streams, &self.service, &self.method).await?;
            let body = self
                .req_codec
                .encode(&request)
                .map_err(|e| Status::new(StatusCode::InvalidArgument, e.to_string()))?;
            call.send_payload(body, true).await?;

            match call.recv_one_message().await? {
                Some(bytes) => self
                    .resp_codec
                    .decode(&bytes)
                    .map_err(|e| Status::new(StatusCode::Internal, e.to_string())),
                None => Err(Status::new(
                    StatusCode::Internal,
                    "unary call completed with zero response messages",
                )),
            }
        })
        .await
    }
}

/// A stream of typed responses, backed by a decoding task draining the
/// underlying call's raw events.
pub struct ResponseStream<Resp> {
    inner: ReceiverStream<Result<Resp, Status>>,
}

impl<Resp> ResponseStream<Resp> {
    pub async fn message(&mut self) -> Option<Result<Resp, Status>> {
        use tokio_stream::StreamExt;
        self.inner.next().await
    }
}

impl<Resp> futures_core::Stream for ResponseStream<Resp> {
    type Item = Result<Resp, Status>;
    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

/// A single-request, streamed-response call.
pub struct ServerStreamingCaller<Req, Resp> {
    pub(crate) transport: Transport,
    pub(crate) streams: StreamMap,
    pub(crate) service: String,
    pub(crate) method: String,
    pub(crate) req_codec: Arc<dyn Codec<Req> + Send + Sync>,
    pub(crate) resp_codec: Arc<dyn Codec<Resp> + Send + Sync>,
}

impl<Req: Send + 'static, Resp: Send + 'static> ServerStreamingCaller<Req, Resp> {
    pub async fn call(
        &self,
        request: Req,
        deadline: Option<Duration>,
    ) -> Result<ResponseStream<Resp>, Status> {
        let call = RawCall::open(&self.transport, &self.streams, &self.service, &self.method).await?;
        let body = self
            .req_codec
            .encode(&request)
            .map_err(|e| Status::new(StatusCode::InvalidArgument, e.to_string()))?;
        call.send_payload(body, true).await?;

        let resp_codec = self.resp_codec.clone();
        const RESPONSE_STREAM_BUFFER: usize = 16;
        let (out_tx, out_rx) = mpsc::channel(RESPONSE_STREAM_BUFFER);
        let deadline_fut = deadline.map(tokio::time::sleep);
        tokio::spawn(drive_response_stream(call, resp_codec, out_tx, deadline_fut));

        Ok(ResponseStream {
            inner: ReceiverStream::new(out_rx),
        })
    }
}

async fn drive_response_stream<Resp: Send + 'static>(
    call: RawCall,
    resp_codec: Arc<dyn Codec<Resp> + Send + Sync>,
    out_tx: mpsc::Sender<Result<Resp, Status>>,
    deadline_fut: Option<tokio::time::Sleep>,
) {
    let drive = async {
        loop {
            match call.recv_event().await {
                Some(CallEvent::Message(bytes)) => {
                    let decoded = resp_codec
                        .decode(&bytes)
                        .map_err(|e| Status::new(StatusCode::Internal, e.to_string()));
                    if out_tx.send(decoded).await.is_err() {
                        return;
                    }
                }
                Some(CallEvent::Metadata(_)) => continue,
                Some(CallEvent::Trailer(trailer)) => {
                    let status = status_from_trailer(&trailer);
                    if !status.is_ok() {
                        let _ = out_tx.send(Err(status)).await;
                    }
                    return;
                }
                None => {
                    let _ = out_tx
                        .send(Err(Status::new(StatusCode::Unavailable, "transport closed")))
                        .await;
                    return;
                }
            }
        }
    };

    match deadline_fut {
        Some(sleep) => tokio::select! {
            _ = drive => {}
            _ = sleep => {
                let _ = out_tx
                    .send(Err(Status::new(StatusCode::DeadlineExceeded, "deadline exceeded")))
                    .await;
            }
        },
        None => drive.await,
    }
}

/// A streamed-request, single-response call. The caller supplies the full
/// sequence of requests up front; true incrementally-produced streaming can
/// be built directly on [`BidiCall`] instead.
pub struct ClientStreamingCaller<Req, Resp> {
    pub(crate) transport: Transport,
    pub(crate) streams: StreamMap,
    pub(crate) service: String,
    pub(crate) method: String,
    pub(crate) req_codec: Arc<dyn Codec<Req> + Send + Sync>,
    pub(crate) resp_codec: Arc<dyn Codec<Resp> + Send + Sync>,
}

impl<Req: Send + 'static, Resp: Send + 'static> ClientStreamingCaller<Req, Resp> {
    pub async fn call(
        &self,
        requests: impl IntoIterator<Item = Req> + Send,
        deadline: Option<Duration>,
    ) -> Result<Resp, Status> {
        with_deadline(deadline, async {
            let call = RawCall::open(&self.transport, &self.streams, &self.service, &self.method).await?;
            let mut sent_any = false;
            for request in requests {
                let body = self
                    .req_codec
                    .encode(&request)
                    .map_err(|e| Status::new(StatusCode::InvalidArgument, e.to_string()))?;
                call.send_payload(body, false).await?;
                sent_any = true;
            }
            if sent_any {
                call.finish_sending().await?;
            } else {
                call.send_payload(Vec::new(), true).await?;
            }

            match call.recv_one_message().await? {
                Some(bytes) => self
                    .resp_codec
                    .decode(&bytes)
                    .map_err(|e| Status::new(StatusCode::Internal, e.to_string())),
                None => Err(Status::new(
                    StatusCode::Internal,
                    "client-streaming call completed with zero response messages",
                )),
            }
        })
        .await
    }
}

/// The fully general call shape: caller drives both directions independently.
pub struct BidiCall<Req, Resp> {
    raw: RawCall,
    req_codec: Arc<dyn Codec<Req> + Send + Sync>,
    resp_codec: Arc<dyn Codec<Resp> + Send + Sync>,
}

impl<Req: Send + 'static, Resp: Send + 'static> BidiCall<Req, Resp> {
    pub(crate) async fn open(
        transport: &Transport,
        streams: &StreamMap,
        service: &str,
        method: &str,
        req_codec: Arc<dyn Codec<Req> + Send + Sync>,
        resp_codec: Arc<dyn Codec<Resp> + Send + Sync>,
    ) -> Result<Self, Status> {
        let raw = RawCall::open(transport, streams, service, method).await?;
        Ok(BidiCall {
            raw,
            req_codec,
            resp_codec,
        })
    }

    pub async fn send(&self, request: Req) -> Result<(), Status> {
        let body = self
            .req_codec
            .encode(&request)
            .map_err(|e| Status::new(StatusCode::InvalidArgument, e.to_string()))?;
        self.raw.send_payload(body, false).await
    }

    pub async fn finish_sending(&self) -> Result<(), Status> {
        self.raw.finish_sending().await
    }

    /// Receives the next response, or `None` once the trailer reports OK.
    /// A non-OK trailer surfaces as `Some(Err(status))`.
    pub async fn recv(&self) -> Option<Result<Resp, Status>> {
        loop {
            match self.raw.recv_event().await {
                Some(CallEvent::Message(bytes)) => {
                    return Some(
                        self.resp_codec
                            .decode(&bytes)
                            .map_err(|e| Status::new(StatusCode::Internal, e.to_string())),
                    )
                }
                Some(CallEvent::Metadata(_)) => continue,
                Some(CallEvent::Trailer(trailer)) => {
                    let status = status_from_trailer(&trailer);
                    return if status.is_ok() { None } else { Some(Err(status)) };
                }
                None => {
                    return Some(Err(Status::new(StatusCode::Unavailable, "transport closed")))
                }
            }
        }
    }
}

/// The responder-side view of a call: only message flow, no wire framing.
/// Trailer emission is the endpoint's job, not the handler's.
pub struct HandlerCtx {
    call: RawCall,
}

impl HandlerCtx {
    pub(crate) fn new(call: RawCall) -> Self {
        HandlerCtx { call }
    }

    /// Returns the next inbound message, or `None` once the caller has
    /// finished sending.
    pub async fn recv_request(&self) -> Option<Bytes> {
        loop {
            match self.call.recv_event().await {
                Some(CallEvent::Message(bytes)) => return Some(bytes),
                Some(CallEvent::Metadata(_)) | Some(CallEvent::Trailer(_)) => continue,
                None => return None,
            }
        }
    }

    pub async fn send_response(&self, bytes: Vec<u8>) -> Result<(), Status> {
        self.call.send_payload(bytes, false).await
    }
}

/// Type-erased request handler, registered against a `(service, method)`
/// pair. The endpoint owns trailer emission; a handler only ever needs to
/// read requests and write responses through its [`HandlerCtx`].
pub trait Handler: Send + Sync + 'static {
    fn method_type(&self) -> MethodType;
    fn invoke(&self, ctx: HandlerCtx) -> Pin<Box<dyn Future<Output = Status> + Send>>;
}

struct UnaryHandlerImpl<Req, Resp, F> {
    req_codec: Arc<dyn Codec<Req> + Send + Sync>,
    resp_codec: Arc<dyn Codec<Resp> + Send + Sync>,
    f: Arc<F>,
}

impl<Req, Resp, F, Fut> Handler for UnaryHandlerImpl<Req, Resp, F>
where
    Req: Send + Sync + 'static,
    Resp: Send + Sync + 'static,
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
{
    fn method_type(&self) -> MethodType {
        MethodType::Unary
    }

    fn invoke(&self, ctx: HandlerCtx) -> Pin<Box<dyn Future<Output = Status> + Send>> {
        let req_codec = self.req_codec.clone();
        let resp_codec = self.resp_codec.clone();
        let f = self.f.clone();
        Box::pin(async move {
            let bytes = match ctx.recv_request().await {
                Some(bytes) => bytes,
                None => return Status::new(StatusCode::InvalidArgument, "no request message received"),
            };
            let request = match req_codec.decode(&bytes) {
                Ok(r) => r,
                Err(e) => return Status::new(StatusCode::InvalidArgument, e.to_string()),
            };
            match f(request).await {
                Ok(response) => {
                    let body = match resp_codec.encode(&response) {
                        Ok(b) => b,
                        Err(e) => return Status::new(StatusCode::Internal, e.to_string()),
                    };
                    match ctx.send_response(body).await {
                        Ok(()) => Status::ok(),
                        Err(status) => status,
                    }
                }
                Err(status) => status,
            }
        })
    }
}

/// Wraps a unary user closure as a type-erased [`Handler`].
pub fn unary_handler<Req, Resp, F, Fut>(
    req_codec: Arc<dyn Codec<Req> + Send + Sync>,
    resp_codec: Arc<dyn Codec<Resp> + Send + Sync>,
    f: F,
) -> Arc<dyn Handler>
where
    Req: Send + Sync + 'static,
    Resp: Send + Sync + 'static,
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
{
    Arc::new(UnaryHandlerImpl {
        req_codec,
        resp_codec,
        f: Arc::new(f),
    })
}

struct ServerStreamingHandlerImpl<Req, Resp, F> {
    req_codec: Arc<dyn Codec<Req> + Send + Sync>,
    resp_codec: Arc<dyn Codec<Resp> + Send + Sync>,
    f: Arc<F>,
}

/// Channel a server-streaming or bidirectional handler writes responses to;
/// the endpoint drains it onto the wire.
pub struct ResponseSink<Resp> {
    ctx: Arc<HandlerCtx>,
    resp_codec: Arc<dyn Codec<Resp> + Send + Sync>,
}

impl<Resp> ResponseSink<Resp> {
    pub async fn send(&self, response: Resp) -> Result<(), Status> {
        let body = self
            .resp_codec
            .encode(&response)
            .map_err(|e| Status::new(StatusCode::Internal, e.to_string()))?;
        self.ctx.send_response(body).await
    }
}

impl<Req, Resp, F, Fut> Handler for ServerStreamingHandlerImpl<Req, Resp, F>
where
    Req: Send + Sync + 'static,
    Resp: Send + Sync + 'static,
    F: Fn(Req, ResponseSink<Resp>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Status> + Send + 'static,
{
    fn method_type(&self) -> MethodType {
        MethodType::ServerStreaming
    }

    fn invoke(&self, ctx: HandlerCtx) -> Pin<Box<dyn Future<Output = Status> + Send>> {
        let req_codec = self.req_codec.clone();
        let resp_codec = self.resp_codec.clone();
        let f = self.f.clone();
        Box::pin(async move {
            let bytes = match ctx.recv_request().await {
                Some(bytes) => bytes,
                None => return Status::new(StatusCode::InvalidArgument, "no request message received"),
            };
            let request = match req_codec.decode(&bytes) {
                Ok(r) => r,
                Err(e) => return Status::new(StatusCode::InvalidArgument, e.to_string()),
            };
            let ctx = Arc::new(ctx);
            let sink = ResponseSink { ctx, resp_codec };
            f(request, sink).await
        })
    }
}

/// Wraps a server-streaming user closure as a type-erased [`Handler`]. The
/// closure drives the response side itself via the supplied [`ResponseSink`]
/// and returns the final trailer status when it's done.
pub fn server_streaming_handler<Req, Resp, F, Fut>(
    req_codec: Arc<dyn Codec<Req> + Send + Sync>,
    resp_codec: Arc<dyn Codec<Resp> + Send + Sync>,
    f: F,
) -> Arc<dyn Handler>
where
    Req: Send + Sync + 'static,
    Resp: Send + Sync + 'static,
    F: Fn(Req, ResponseSink<Resp>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Status> + Send + 'static,
{
    Arc::new(ServerStreamingHandlerImpl {
        req_codec,
        resp_codec,
        f: Arc::new(f),
    })
}

struct ClientStreamingHandlerImpl<Req, Resp, F> {
    req_codec: Arc<dyn Codec<Req> + Send + Sync>,
    resp_codec: Arc<dyn Codec<Resp> + Send + Sync>,
    f: Arc<F>,
}

/// Stream of decoded requests a client-streaming or bidirectional handler
/// reads from.
pub struct RequestStream<Req> {
    ctx: Arc<HandlerCtx>,
    req_codec: Arc<dyn Codec<Req> + Send + Sync>,
}

impl<Req> RequestStream<Req> {
    pub async fn next(&self) -> Option<Result<Req, Status>> {
        let bytes = self.ctx.recv_request().await?;
        Some(
            self.req_codec
                .decode(&bytes)
                .map_err(|e| Status::new(StatusCode::InvalidArgument, e.to_string())),
        )
    }
}

impl<Req, Resp, F, Fut> Handler for ClientStreamingHandlerImpl<Req, Resp, F>
where
    Req: Send + Sync + 'static,
    Resp: Send + Sync + 'static,
    F: Fn(RequestStream<Req>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
{
    fn method_type(&self) -> MethodType {
        MethodType::ClientStreaming
    }

    fn invoke(&self, ctx: HandlerCtx) -> Pin<Box<dyn Future<Output = Status> + Send>> {
        let req_codec = self.req_codec.clone();
        let resp_codec = self.resp_codec.clone();
        let f = self.f.clone();
        Box::pin(async move {
            let ctx = Arc::new(ctx);
            let requests = RequestStream { ctx: ctx.clone(), req_codec };
            match f(requests).await {
                Ok(response) => {
                    let body = match resp_codec.encode(&response) {
                        Ok(b) => b,
                        Err(e) => return Status::new(StatusCode::Internal, e.to_string()),
                    };
                    match ctx.send_response(body).await {
                        Ok(()) => Status::ok(),
                        Err(status) => status,
                    }
                }
                Err(status) => status,
            }
        })
    }
}

/// Wraps a client-streaming user closure as a type-erased [`Handler`].
pub fn client_streaming_handler<Req, Resp, F, Fut>(
    req_codec: Arc<dyn Codec<Req> + Send + Sync>,
    resp_codec: Arc<dyn Codec<Resp> + Send + Sync>,
    f: F,
) -> Arc<dyn Handler>
where
    Req: Send + Sync + 'static,
    Resp: Send + Sync + 'static,
    F: Fn(RequestStream<Req>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
{
    Arc::new(ClientStreamingHandlerImpl {
        req_codec,
        resp_codec,
        f: Arc::new(f),
    })
}

struct BidiHandlerImpl<Req, Resp, F> {
    req_codec: Arc<dyn Codec<Req> + Send + Sync>,
    resp_codec: Arc<dyn Codec<Resp> + Send + Sync>,
    f: Arc<F>,
}

impl<Req, Resp, F, Fut> Handler for BidiHandlerImpl<Req, Resp, F>
where
    Req: Send + Sync + 'static,
    Resp: Send + Sync + 'static,
    F: Fn(RequestStream<Req>, ResponseSink<Resp>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Status> + Send + 'static,
{
    fn method_type(&self) -> MethodType {
        MethodType::Bidirectional
    }

    fn invoke(&self, ctx: HandlerCtx) -> Pin<Box<dyn Future<Output = Status> + Send>> {
        let req_codec = self.req_codec.clone();
        let resp_codec = self.resp_codec.clone();
        let f = self.f.clone();
        Box::pin(async move {
            let ctx = Arc::new(ctx);
            let requests = RequestStream { ctx: ctx.clone(), req_codec };
            let responses = ResponseSink { ctx, resp_codec };
            f(requests, responses).await
        })
    }
}

/// Wraps a bidirectional user closure as a type-erased [`Handler`]. The
/// closure owns both directions and returns the final trailer status.
pub fn bidi_handler<Req, Resp, F, Fut>(
    req_codec: Arc<dyn Codec<Req> + Send + Sync>,
    resp_codec: Arc<dyn Codec<Resp> + Send + Sync>,
    f: F,
) -> Arc<dyn Handler>
where
    Req: Send + Sync + 'static,
    Resp: Send + Sync + 'static,
    F: Fn(RequestStream<Req>, ResponseSink<Resp>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Status> + Send + 'static,
{
    Arc::new(BidiHandlerImpl {
        req_codec,
        resp_codec,
        f: Arc::new(f),
    })
}
