//! Message frame codec: `[compressed: u8][len: u32 BE][payload]`.
//!
//! The parser is restartable across transport chunk boundaries: a chunk may
//! contain zero, one, or many complete message frames, and a frame may be
//! split across many chunks. Ordering within a stream is preserved because
//! [`FrameParser`] drains frames in arrival order.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// Header size: 1 byte compressed flag + 4 bytes big-endian length.
const HEADER_LEN: usize = 5;

/// Errors raised by the message frame codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameCodecError {
    /// Declared payload length exceeds the configured maximum frame size.
    FrameTooLarge { declared: u32, max: u32 },
}

impl fmt::Display for FrameCodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameCodecError::FrameTooLarge { declared, max } => write!(
                f,
                "malformed frame: declared length {declared} exceeds maximum {max}"
            ),
        }
    }
}

impl std::error::Error for FrameCodecError {}

/// Default maximum payload length accepted by a [`FrameParser`] (4 MiB).
pub const DEFAULT_MAX_FRAME_LEN: u32 = 4 * 1024 * 1024;

/// A decoded message frame: the payload and whether it claimed to be compressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub compressed: bool,
    pub payload: Bytes,
}

/// Encode a payload into a single message frame.
///
/// Compression itself is not performed by this codec: `compressed=1` is
/// rejected by the receiving side with UNIMPLEMENTED until a negotiated
/// compression scheme exists, so callers always pass `compressed = false`
/// today.
pub fn encode_frame(payload: &[u8], compressed: bool) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u8(compressed as u8);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Stateful, restartable decoder for the message frame stream on one logical
/// stream id. Buffers partial frames across `feed` calls.
#[derive(Debug, Default)]
pub struct FrameParser {
    buf: BytesMut,
    max_frame_len: u32,
}

impl FrameParser {
    pub fn new() -> Self {
        FrameParser {
            buf: BytesMut::new(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    pub fn with_max_frame_len(max_frame_len: u32) -> Self {
        FrameParser {
            buf: BytesMut::new(),
            max_frame_len,
        }
    }

    /// Feed a chunk of bytes, returning every complete frame it yields
    /// (zero, one, or many). Incomplete trailing data is buffered for the
    /// next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<DecodedFrame>, FrameCodecError> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        loop {
            if self.buf.len() < HEADER_LEN {
                break;
            }

            let compressed = self.buf[0] != 0;
            let len = u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]);

            if len > self.max_frame_len {
                return Err(FrameCodecError::FrameTooLarge {
                    declared: len,
                    max: self.max_frame_len,
                });
            }

            let total = HEADER_LEN + len as usize;
            if self.buf.len() < total {
                break;
            }

            self.buf.advance(HEADER_LEN);
            let payload = self.buf.split_to(len as usize).freeze();
            out.push(DecodedFrame { compressed, payload });
        }

        Ok(out)
    }

    /// Number of bytes currently buffered (partial frame data).
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}
