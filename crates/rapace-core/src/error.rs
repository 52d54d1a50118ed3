//! Error taxonomy for the transport, stream-id and serialization layers.
//! Call-level failures use [`rapace_wire::Status`] directly.

use std::fmt;

/// Transport-level failure: the underlying connection is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport has been closed, locally or by the peer.
    Closed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Closed => write!(f, "transport closed"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Raised by [`crate::StreamIdManager::allocate`] once the id space is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamIdExhausted;

impl fmt::Display for StreamIdExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream id space exhausted, a new transport is required")
    }
}

impl std::error::Error for StreamIdExhausted {}

/// Raised by a [`crate::Codec`] implementation. Carries the offending bytes
/// for diagnostics; decoders must return this rather than panic on
/// malformed input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerializationError {
    Encode(String),
    Decode { message: String, bytes: Vec<u8> },
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializationError::Encode(msg) => write!(f, "serialization failed: {msg}"),
            SerializationError::Decode { message, bytes } => write!(
                f,
                "deserialization failed: {message} ({} bytes)",
                bytes.len()
            ),
        }
    }
}

impl std::error::Error for SerializationError {}

/// Raised during service registration when a `(service, method)` tuple is
/// registered more than once against the same endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    DuplicateMethod { service: String, method: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::DuplicateMethod { service, method } => {
                write!(f, "duplicate method registration: {service}/{method}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
