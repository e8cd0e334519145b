//! Error types for the wire layer.

use thiserror::Error;

use crate::protocol::ErrorCode;

/// A protocol-level failure that is reported to the client as a single
/// `kXR_error` response frame. The connection stays up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XrootdError {
    pub code: ErrorCode,
    pub message: String,
}

impl XrootdError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for XrootdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} ({}): {}", self.code, self.code as u16, self.message)
    }
}

impl std::error::Error for XrootdError {}

/// A framing failure. Unlike [`XrootdError`], these cannot be answered on the
/// wire: the stream position is no longer trustworthy and the connection is
/// terminated.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("truncated frame while reading {0}")]
    ShortFrame(&'static str),

    #[error("invalid payload length {len} (cap {max})")]
    BadLength { len: i64, max: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
