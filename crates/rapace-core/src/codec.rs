//! Pluggable encode/decode of user message types, independent of wire framing.
//!
//! A codec must be total on its declared type and must never panic on
//! malformed input — decode failures are reported as errors so a bad payload
//! on one call can't take down the process handling it.

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use crate::error::SerializationError;

/// Wire encoding identifier, transmitted alongside a call's content-type so
/// peers agree on how to decode message payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Encoding {
    /// Compact binary format (default).
    Postcard = 1,
    /// Human-readable format, useful for debugging/tooling.
    Json = 2,
    /// No serialization: bytes pass through unchanged.
    Raw = 3,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Postcard => write!(f, "postcard"),
            Encoding::Json => write!(f, "json"),
            Encoding::Raw => write!(f, "raw"),
        }
    }
}

/// Per-call codec: encodes/decodes one Rust type to/from bytes.
///
/// Implementations must be total on `T` and must fail with
/// [`SerializationError`] rather than panic on malformed input.
pub trait Codec<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<Vec<u8>, SerializationError>;
    fn decode(&self, bytes: &[u8]) -> Result<T, SerializationError>;
}

/// A [`Codec`] over any `serde`-compatible type, backed by either Postcard
/// or JSON depending on the [`Encoding`] it was built with.
pub struct SerdeCodec<T> {
    encoding: Encoding,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeCodec<T> {
    pub fn new(encoding: Encoding) -> Self {
        assert!(
            !matches!(encoding, Encoding::Raw),
            "Encoding::Raw is not a serde encoding; use RawCodec instead"
        );
        SerdeCodec {
            encoding,
            _marker: PhantomData,
        }
    }

    pub fn postcard() -> Self {
        Self::new(Encoding::Postcard)
    }

    pub fn json() -> Self {
        Self::new(Encoding::Json)
    }
}

impl<T: Serialize + DeserializeOwned + Send + Sync> Codec<T> for SerdeCodec<T> {
    fn encode(&self, value: &T) -> Result<Vec<u8>, SerializationError> {
        match self.encoding {
            Encoding::Postcard => postcard::to_allocvec(value)
                .map_err(|e| SerializationError::Encode(e.to_string())),
            Encoding::Json => {
                serde_json::to_vec(value).map_err(|e| SerializationError::Encode(e.to_string()))
            }
            Encoding::Raw => unreachable!("guarded in new()"),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        match self.encoding {
            Encoding::Postcard => postcard::from_bytes(bytes).map_err(|e| SerializationError::Decode {
                message: e.to_string(),
                bytes: bytes.to_vec(),
            }),
            Encoding::Json => {
                serde_json::from_slice(bytes).map_err(|e| SerializationError::Decode {
                    message: e.to_string(),
                    bytes: bytes.to_vec(),
                })
            }
            Encoding::Raw => unreachable!("guarded in new()"),
        }
    }
}

/// Identity codec for `Vec<u8>` payloads: no serialization performed.
pub struct RawCodec;

impl Codec<Vec<u8>> for RawCodec {
    fn encode(&self, value: &Vec<u8>) -> Result<Vec<u8>, SerializationError> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, SerializationError> {
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Greeting {
        text: String,
    }

    #[test]
    fn postcard_roundtrip() {
        let codec = SerdeCodec::<Greeting>::postcard();
        let value = Greeting {
            text: "hi".to_string(),
        };
        let encoded = codec.encode(&value).unwrap();
        assert_eq!(codec.decode(&encoded).unwrap(), value);
    }

    #[test]
    fn json_roundtrip() {
        let codec = SerdeCodec::<Greeting>::json();
        let value = Greeting {
            text: "hi".to_string(),
        };
        let encoded = codec.encode(&value).unwrap();
        assert_eq!(encoded, br#"{"text":"hi"}"#);
        assert_eq!(codec.decode(&encoded).unwrap(), value);
    }

    #[test]
    fn malformed_json_fails_without_panicking() {
        let codec = SerdeCodec::<Greeting>::json();
        let err = codec.decode(b"not json").unwrap_err();
        match err {
            SerializationError::Decode { bytes, .. } => assert_eq!(bytes, b"not json"),
            _ => panic!("expected Decode error"),
        }
    }

    #[test]
    fn raw_codec_passes_bytes_through() {
        let codec = RawCodec;
        let data = vec![1, 2, 3];
        let encoded = codec.encode(&data).unwrap();
        assert_eq!(encoded, data);
        assert_eq!(codec.decode(&encoded).unwrap(), data);
    }
}
