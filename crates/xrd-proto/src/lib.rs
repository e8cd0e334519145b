//! # xrd-proto
//!
//! Wire-level implementation of the xrootd client/server protocol as used by
//! a data server: the `kXR_*` constant space, request and response message
//! types, and the frame codec that moves them over a byte stream.
//!
//! The protocol is a binary request/response scheme. Every client request is
//! a 24-byte header followed by `dlen` bytes of payload; every server
//! response is an 8-byte header followed by `dlen` bytes. Large read payloads
//! are delivered as a sequence of frames sharing one stream id, all but the
//! last carrying the `kXR_oksofar` status.

pub mod error;
pub mod frame;
pub mod messages;
pub mod protocol;

pub use error::{FrameError, XrootdError};
pub use frame::{RequestFrame, ResponseFrame, REQUEST_HEADER_SIZE, RESPONSE_HEADER_SIZE};
pub use messages::{EmbeddedReadRequest, LocateInfo, Op, Request, Response};
pub use protocol::{
    ErrorCode, FileStatus, OpenFlags, RequestCode, StatusCode, CLIENT_HANDSHAKE, DATA_SERVER,
    PROTOCOL_VERSION,
};
