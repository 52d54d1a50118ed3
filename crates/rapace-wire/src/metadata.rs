//! An ordered, immutable header list with O(n) case-sensitive lookup, plus
//! constructors for the three metadata shapes a call exchanges: the
//! client's initial request headers, the server's initial response headers,
//! and the closing trailer.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

use crate::status::StatusCode;

pub const METHOD: &str = ":method";
pub const PATH: &str = ":path";
pub const SCHEME: &str = ":scheme";
pub const AUTHORITY: &str = ":authority";
pub const CONTENT_TYPE: &str = "content-type";
pub const GRPC_STATUS: &str = "grpc-status";
pub const GRPC_MESSAGE: &str = "grpc-message";
pub const TE: &str = "te";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    Truncated,
    InvalidUtf8,
}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataError::Truncated => write!(f, "malformed frame: metadata body truncated"),
            MetadataError::InvalidUtf8 => write!(f, "malformed frame: metadata is not valid UTF-8"),
        }
    }
}

impl std::error::Error for MetadataError {}

/// An ordered, immutable list of (name, value) string pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pairs: Vec<(String, String)>,
}

impl Metadata {
    pub fn new() -> Self {
        Metadata { pairs: Vec::new() }
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((name.into(), value.into()));
    }

    /// Case-sensitive lookup of the first matching value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Initial client metadata for a call: carries `:path = /service/method`.
    pub fn for_client_request(service: &str, method: &str, authority: Option<&str>) -> Self {
        let mut m = Metadata::new();
        m.push(METHOD, "POST");
        m.push(PATH, format!("/{service}/{method}"));
        m.push(SCHEME, "http");
        if let Some(authority) = authority {
            m.push(AUTHORITY, authority);
        }
        m.push(CONTENT_TYPE, "application/rapace");
        m.push(TE, "trailers");
        m
    }

    /// Server initial response metadata: carries `:status = 200`.
    pub fn for_server_initial_response() -> Self {
        let mut m = Metadata::new();
        m.push(":status", "200");
        m.push(CONTENT_TYPE, "application/rapace");
        m
    }

    /// Trailer metadata: `grpc-status` is always present; `grpc-message` is
    /// included only for a non-OK status with a non-empty message.
    pub fn for_trailer(status: StatusCode, message: Option<&str>) -> Self {
        let mut m = Metadata::new();
        m.push(GRPC_STATUS, status.as_i32().to_string());
        if !status.is_ok() {
            if let Some(message) = message {
                if !message.is_empty() {
                    m.push(GRPC_MESSAGE, message);
                }
            }
        }
        m
    }

    /// Wire format: repeated `[nameLen:2 BE][name][valueLen:2 BE][value]`.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        for (name, value) in &self.pairs {
            buf.put_u16(name.len() as u16);
            buf.put_slice(name.as_bytes());
            buf.put_u16(value.len() as u16);
            buf.put_slice(value.as_bytes());
        }
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, MetadataError> {
        let mut pairs = Vec::new();
        while !buf.is_empty() {
            if buf.len() < 2 {
                return Err(MetadataError::Truncated);
            }
            let name_len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
            buf.advance(2);
            if buf.len() < name_len + 2 {
                return Err(MetadataError::Truncated);
            }
            let name = String::from_utf8(buf.split_to(name_len).to_vec())
                .map_err(|_| MetadataError::InvalidUtf8)?;

            let value_len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
            buf.advance(2);
            if buf.len() < value_len {
                return Err(MetadataError::Truncated);
            }
            let value = String::from_utf8(buf.split_to(value_len).to_vec())
                .map_err(|_| MetadataError::InvalidUtf8)?;

            pairs.push((name, value));
        }
        Ok(Metadata { pairs })
    }
}
