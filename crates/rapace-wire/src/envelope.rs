//! The byte-exact envelope header used by transports that need a custom
//! framing (in-memory, WebSocket). HTTP/2-style transports use native
//! headers/data frames instead and never touch this module.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// Frame type carried in the envelope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Metadata,
    Data,
}

impl FrameType {
    fn as_u8(self) -> u8 {
        match self {
            FrameType::Metadata => 0,
            FrameType::Data => 1,
        }
    }

    fn from_u8(val: u8) -> Result<Self, EnvelopeError> {
        match val {
            0 => Ok(FrameType::Metadata),
            1 => Ok(FrameType::Data),
            other => Err(EnvelopeError::UnknownFrameType(other)),
        }
    }
}

/// Errors raised while decoding an envelope header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    Truncated,
    UnknownFrameType(u8),
    InvalidMethodPathUtf8,
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeError::Truncated => write!(f, "malformed frame: envelope header truncated"),
            EnvelopeError::UnknownFrameType(v) => {
                write!(f, "malformed frame: unknown envelope type {v}")
            }
            EnvelopeError::InvalidMethodPathUtf8 => {
                write!(f, "malformed frame: method path is not valid UTF-8")
            }
        }
    }
}

impl std::error::Error for EnvelopeError {}

/// One transport-level envelope: `{streamId, type, endOfStream, methodPath?}`
/// plus its body bytes (either an encoded metadata list or one-or-more
/// message frames, depending on `frame_type`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub stream_id: u32,
    pub frame_type: FrameType,
    pub end_of_stream: bool,
    pub method_path: Option<String>,
    pub body: Bytes,
}

const END_OF_STREAM_BIT: u8 = 0b0000_0001;

impl Envelope {
    /// Wire format:
    /// `[type:1][streamId:4 BE][flags:1][methodPathLen:2 LE][methodPath][body]`
    pub fn encode(&self) -> Bytes {
        let path_bytes = self.method_path.as_deref().unwrap_or("").as_bytes();
        let mut buf = BytesMut::with_capacity(8 + path_bytes.len() + self.body.len());
        buf.put_u8(self.frame_type.as_u8());
        buf.put_u32(self.stream_id);
        let flags = if self.end_of_stream { END_OF_STREAM_BIT } else { 0 };
        buf.put_u8(flags);
        buf.put_u16_le(path_bytes.len() as u16);
        buf.put_slice(path_bytes);
        buf.put_slice(&self.body);
        buf.freeze()
    }

    /// Decode a full envelope from an exact-length buffer (the transport is
    /// responsible for framing the underlying byte stream; this codec only
    /// parses one already-delimited envelope, unlike [`crate::FrameParser`]
    /// which is restartable for the message-frame sub-stream).
    pub fn decode(mut buf: Bytes) -> Result<Self, EnvelopeError> {
        if buf.len() < 8 {
            return Err(EnvelopeError::Truncated);
        }
        let frame_type = FrameType::from_u8(buf[0])?;
        let stream_id = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        let flags = buf[5];
        let end_of_stream = flags & END_OF_STREAM_BIT != 0;
        let path_len = u16::from_le_bytes([buf[6], buf[7]]) as usize;

        buf.advance(8);
        if buf.len() < path_len {
            return Err(EnvelopeError::Truncated);
        }
        let path_bytes = buf.split_to(path_len);
        let method_path = if path_len == 0 {
            None
        } else {
            Some(
                String::from_utf8(path_bytes.to_vec())
                    .map_err(|_| EnvelopeError::InvalidMethodPathUtf8)?,
            )
        };

        Ok(Envelope {
            stream_id,
            frame_type,
            end_of_stream,
            method_path,
            body: buf,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_with_method_path() {
        let env = Envelope {
            stream_id: 7,
            frame_type: FrameType::Metadata,
            end_of_stream: false,
            method_path: Some("/Echo/SayHello".to_string()),
            body: Bytes::new(),
        };
        let encoded = env.encode();
        let decoded = Envelope::decode(encoded).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn roundtrip_without_method_path() {
        let env = Envelope {
            stream_id: 2,
            frame_type: FrameType::Data,
            end_of_stream: true,
            method_path: None,
            body: Bytes::from_static(b"payload"),
        };
        let encoded = env.encode();
        let decoded = Envelope::decode(encoded).unwrap();
        assert_eq!(decoded, env);
        assert!(decoded.end_of_stream);
    }

    #[test]
    fn truncated_header_rejected() {
        let err = Envelope::decode(Bytes::from_static(b"short")).unwrap_err();
        assert_eq!(err, EnvelopeError::Truncated);
    }

    #[test]
    fn unknown_type_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(9);
        buf.put_u32(1);
        buf.put_u8(0);
        buf.put_u16_le(0);
        let err = Envelope::decode(buf.freeze()).unwrap_err();
        assert_eq!(err, EnvelopeError::UnknownFrameType(9));
    }
}
