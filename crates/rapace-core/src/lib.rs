//! Endpoint, call primitives and service contracts for the rapace RPC
//! runtime: everything above the wire format and below the router layer.

mod call;
mod codec;
mod contract;
mod endpoint;
mod error;
mod stream_id;
mod transport;

pub use call::{
    bidi_handler, client_streaming_handler, server_streaming_handler, unary_handler, BidiCall,
    ClientStreamingCaller, Handler, HandlerCtx, MethodType, RequestStream, ResponseSink,
    ResponseStream, ServerStreamingCaller, UnaryCaller,
};
pub use codec::{Codec, Encoding, RawCodec, SerdeCodec};
pub use contract::{MethodDescriptor, Registry, RegistryBuilder, ServiceContract};
pub use endpoint::Endpoint;
pub use error::{ConfigError, SerializationError, TransportError};
pub use stream_id::{Role, StreamIdExhausted, StreamIdManager, MAX_STREAM_ID};
#[cfg(feature = "mem")]
pub use transport::mem;
pub use transport::{Inbound, InboundBody, Transport};

pub use rapace_wire::{Status, StatusCode};
