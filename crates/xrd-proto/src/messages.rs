//! Typed request and response messages.
//!
//! [`Request::parse`] lifts a raw [`RequestFrame`] into a tagged [`Op`]; the
//! per-opcode parameter layouts follow the xrootd specification. Malformed
//! bodies surface as [`XrootdError`] so the dispatcher can answer them with a
//! single error frame instead of dropping the connection.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::SocketAddr;

use crate::error::XrootdError;
use crate::frame::RequestFrame;
use crate::protocol::{ErrorCode, FileStatus, OpenFlags, RequestCode, StatusCode};

/// One element of a `readv` request vector, and the layout of the 16-byte
/// header prefixed to that element's data in the response:
/// `fd(4) | length(4) | offset(8)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedReadRequest {
    pub fd: u32,
    pub len: u32,
    pub offset: i64,
}

impl EmbeddedReadRequest {
    pub const WIRE_SIZE: usize = 16;

    pub fn encode_header(&self, buf: &mut BytesMut) {
        buf.put_u32(self.fd);
        buf.put_u32(self.len);
        buf.put_i64(self.offset);
    }
}

/// A decoded request: the opcode-specific payload plus the stream id echoed
/// in every response frame.
#[derive(Debug, Clone)]
pub struct Request {
    pub stream_id: u16,
    pub op: Op,
}

/// The opcode set served by a data server.
#[derive(Debug, Clone)]
pub enum Op {
    Protocol {
        client_pv: i32,
    },
    Login {
        pid: i32,
        username: String,
    },
    Ping,
    Stat {
        path: String,
    },
    Statx {
        paths: Vec<String>,
    },
    Rm {
        path: String,
    },
    Rmdir {
        path: String,
    },
    Mkdir {
        path: String,
        mkpath: bool,
        mode: u16,
    },
    Mv {
        source: String,
        target: String,
    },
    Dirlist {
        path: String,
    },
    Prepare,
    Open {
        path: String,
        mode: u16,
        options: OpenFlags,
    },
    Read {
        fd: u32,
        offset: i64,
        len: u32,
    },
    ReadV {
        requests: Vec<EmbeddedReadRequest>,
    },
    Write {
        fd: u32,
        offset: i64,
        data: Bytes,
    },
    Sync {
        fd: u32,
    },
    Close {
        fd: u32,
    },
    Locate {
        path: String,
        flags: u16,
    },
    /// Request code this server does not implement; answered with
    /// `kXR_Unsupported`.
    Unsupported {
        code: u16,
    },
}

impl Request {
    pub fn parse(frame: &RequestFrame) -> Result<Request, XrootdError> {
        let op = match RequestCode::from_u16(frame.request_code) {
            Some(RequestCode::Protocol) => Op::Protocol {
                client_pv: be_i32(&frame.params[0..4]),
            },
            Some(RequestCode::Login) => parse_login(frame)?,
            Some(RequestCode::Ping) => Op::Ping,
            Some(RequestCode::Stat) => Op::Stat {
                path: body_path(frame)?,
            },
            Some(RequestCode::Statx) => Op::Statx {
                paths: body_string(frame)?
                    .split('\n')
                    .filter(|p| !p.is_empty())
                    .map(strip_opaque)
                    .collect(),
            },
            Some(RequestCode::Rm) => Op::Rm {
                path: body_path(frame)?,
            },
            Some(RequestCode::Rmdir) => Op::Rmdir {
                path: body_path(frame)?,
            },
            Some(RequestCode::Mkdir) => Op::Mkdir {
                path: body_path(frame)?,
                mkpath: frame.params[0] & 0x01 != 0,
                mode: be_u16(&frame.params[14..16]),
            },
            Some(RequestCode::Mv) => parse_mv(frame)?,
            Some(RequestCode::Dirlist) => Op::Dirlist {
                path: body_path(frame)?,
            },
            Some(RequestCode::Prepare) => Op::Prepare,
            Some(RequestCode::Open) => Op::Open {
                path: body_path(frame)?,
                mode: be_u16(&frame.params[0..2]),
                options: OpenFlags(be_u16(&frame.params[2..4])),
            },
            Some(RequestCode::Read) => Op::Read {
                fd: be_u32(&frame.params[0..4]),
                offset: be_i64(&frame.params[4..12]),
                len: parse_read_len(frame)?,
            },
            Some(RequestCode::ReadV) => parse_readv(frame)?,
            Some(RequestCode::Write) => Op::Write {
                fd: be_u32(&frame.params[0..4]),
                offset: be_i64(&frame.params[4..12]),
                data: frame.body.clone(),
            },
            Some(RequestCode::Sync) => Op::Sync {
                fd: be_u32(&frame.params[0..4]),
            },
            Some(RequestCode::Close) => Op::Close {
                fd: be_u32(&frame.params[0..4]),
            },
            Some(RequestCode::Locate) => Op::Locate {
                path: body_path(frame)?,
                flags: be_u16(&frame.params[0..2]),
            },
            None => Op::Unsupported {
                code: frame.request_code,
            },
        };
        Ok(Request {
            stream_id: frame.stream_id,
            op,
        })
    }
}

fn body_string(frame: &RequestFrame) -> Result<String, XrootdError> {
    String::from_utf8(frame.body.to_vec())
        .map_err(|_| XrootdError::new(ErrorCode::ArgInvalid, "Request body is not valid UTF-8"))
}

fn body_path(frame: &RequestFrame) -> Result<String, XrootdError> {
    Ok(strip_opaque(&body_string(frame)?))
}

/// Drop the CGI portion of a client path (`/file?token=...`).
fn strip_opaque(path: &str) -> String {
    match path.split_once('?') {
        Some((path, _opaque)) => path.to_string(),
        None => path.to_string(),
    }
}

// fixed-width field helpers; the slices are always exactly as wide as the
// target type
fn be_u16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes(bytes.try_into().expect("fixed-width field"))
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes(bytes.try_into().expect("fixed-width field"))
}

fn be_i32(bytes: &[u8]) -> i32 {
    i32::from_be_bytes(bytes.try_into().expect("fixed-width field"))
}

fn be_i64(bytes: &[u8]) -> i64 {
    i64::from_be_bytes(bytes.try_into().expect("fixed-width field"))
}

fn parse_login(frame: &RequestFrame) -> Result<Op, XrootdError> {
    let pid = be_i32(&frame.params[0..4]);
    // username is 8 bytes, NUL padded
    let raw = &frame.params[4..12];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let username = String::from_utf8_lossy(&raw[..end]).into_owned();
    Ok(Op::Login { pid, username })
}

fn parse_mv(frame: &RequestFrame) -> Result<Op, XrootdError> {
    let arg = body_string(frame)?;
    let (source, target) = arg.split_once(' ').unwrap_or((arg.as_str(), ""));
    Ok(Op::Mv {
        source: strip_opaque(source),
        target: strip_opaque(target),
    })
}

fn parse_read_len(frame: &RequestFrame) -> Result<u32, XrootdError> {
    let rlen = be_i32(&frame.params[12..16]);
    if rlen < 0 {
        return Err(XrootdError::new(
            ErrorCode::ArgInvalid,
            format!("Negative read length: {rlen}"),
        ));
    }
    Ok(rlen as u32)
}

fn parse_readv(frame: &RequestFrame) -> Result<Op, XrootdError> {
    if frame.body.len() % EmbeddedReadRequest::WIRE_SIZE != 0 {
        return Err(XrootdError::new(
            ErrorCode::ArgInvalid,
            "Read vector is not a multiple of 16 bytes",
        ));
    }
    let mut buf = &frame.body[..];
    let mut requests = Vec::with_capacity(buf.len() / EmbeddedReadRequest::WIRE_SIZE);
    while buf.has_remaining() {
        let fd = buf.get_u32();
        let len = buf.get_i32();
        let offset = buf.get_i64();
        if len < 0 || offset < 0 {
            return Err(XrootdError::new(
                ErrorCode::ArgInvalid,
                "Negative length or offset in read vector",
            ));
        }
        requests.push(EmbeddedReadRequest {
            fd,
            len: len as u32,
            offset,
        });
    }
    Ok(Op::ReadV { requests })
}

/// Endpoint information returned by `locate`: this server, with read or
/// write access. Wire form `Sr[::addr]:port` / `Sw[::addr]:port`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocateInfo {
    pub addr: SocketAddr,
    pub writable: bool,
}

impl LocateInfo {
    pub fn encode(&self) -> Vec<u8> {
        let access = if self.writable { 'w' } else { 'r' };
        format!("S{}[::{}]:{}", access, self.addr.ip(), self.addr.port()).into_bytes()
    }
}

/// A single-frame server response. Streamed read payloads are produced by
/// the transport and never materialize as a `Response` value.
#[derive(Debug, Clone)]
pub enum Response {
    Ok,
    Error(XrootdError),
    Protocol { version: i32, flags: i32 },
    Login { session: [u8; 16] },
    Stat(FileStatus),
    Statx { flags: Vec<u8> },
    Dirlist { names: Vec<String> },
    Open { fd: u32, status: Option<FileStatus> },
    Locate(Option<LocateInfo>),
}

impl Response {
    /// Encode into `(status, body)` for a single response frame.
    pub fn encode(&self) -> (StatusCode, BytesMut) {
        let mut body = BytesMut::new();
        match self {
            Response::Ok => (StatusCode::Ok, body),
            Response::Error(err) => {
                body.put_i32(err.code as u16 as i32);
                body.put_slice(err.message.as_bytes());
                body.put_u8(0);
                (StatusCode::Error, body)
            }
            Response::Protocol { version, flags } => {
                body.put_i32(*version);
                body.put_i32(*flags);
                (StatusCode::Ok, body)
            }
            Response::Login { session } => {
                body.put_slice(session);
                (StatusCode::Ok, body)
            }
            Response::Stat(status) => {
                body.put_slice(&status.encode());
                (StatusCode::Ok, body)
            }
            Response::Statx { flags } => {
                body.put_slice(flags);
                (StatusCode::Ok, body)
            }
            Response::Dirlist { names } => {
                body.put_slice(names.join("\n").as_bytes());
                body.put_u8(0);
                (StatusCode::Ok, body)
            }
            Response::Open { fd, status } => {
                body.put_u32(*fd);
                if let Some(status) = status {
                    body.put_slice(&status.encode());
                }
                (StatusCode::Ok, body)
            }
            Response::Locate(info) => {
                if let Some(info) = info {
                    body.put_slice(&info.encode());
                }
                (StatusCode::Ok, body)
            }
        }
    }
}
