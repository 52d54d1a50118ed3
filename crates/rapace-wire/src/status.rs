//! RPC status codes: a small gRPC-aligned subset covering the outcomes this
//! runtime itself produces.

use std::fmt;

/// Status code carried in a call's trailer (`grpc-status`).
///
/// Only the subset the runtime itself produces or consumes is represented;
/// unknown codes observed on the wire round-trip through [`StatusCode::Unknown`]
/// rather than failing to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    ResourceExhausted = 8,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
}

impl StatusCode {
    pub fn from_i32(val: i32) -> Self {
        match val {
            0 => StatusCode::Ok,
            1 => StatusCode::Cancelled,
            3 => StatusCode::InvalidArgument,
            4 => StatusCode::DeadlineExceeded,
            5 => StatusCode::NotFound,
            8 => StatusCode::ResourceExhausted,
            12 => StatusCode::Unimplemented,
            13 => StatusCode::Internal,
            14 => StatusCode::Unavailable,
            _ => StatusCode::Unknown,
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_ok(self) -> bool {
        matches!(self, StatusCode::Ok)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusCode::Ok => "OK",
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::Unknown => "UNKNOWN",
            StatusCode::InvalidArgument => "INVALID_ARGUMENT",
            StatusCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            StatusCode::Unimplemented => "UNIMPLEMENTED",
            StatusCode::Internal => "INTERNAL",
            StatusCode::Unavailable => "UNAVAILABLE",
        };
        write!(f, "{s}")
    }
}

/// A call outcome: the status carried in a trailer, plus an optional message.
///
/// The message is never absent at the type level — a non-OK status with
/// nothing to say simply carries an empty string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

impl Status {
    pub fn ok() -> Self {
        Status {
            code: StatusCode::Ok,
            message: String::new(),
        }
    }

    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Status {
            code,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl std::error::Error for Status {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_known_codes() {
        for code in [
            StatusCode::Ok,
            StatusCode::Cancelled,
            StatusCode::InvalidArgument,
            StatusCode::DeadlineExceeded,
            StatusCode::NotFound,
            StatusCode::ResourceExhausted,
            StatusCode::Unimplemented,
            StatusCode::Internal,
            StatusCode::Unavailable,
        ] {
            assert_eq!(StatusCode::from_i32(code.as_i32()), code);
        }
    }

    #[test]
    fn unknown_code_maps_to_unknown() {
        assert_eq!(StatusCode::from_i32(999), StatusCode::Unknown);
    }

    #[test]
    fn ok_status_has_empty_message() {
        let s = Status::ok();
        assert!(s.is_ok());
        assert_eq!(s.message, "");
    }
}
