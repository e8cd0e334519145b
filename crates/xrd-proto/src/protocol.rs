//! Protocol constants from the xrootd specification.
//!
//! Numeric values follow the reference `XProtocol.hh` constant space: request
//! codes start at 3000, response status codes at 4000 (`kXR_ok` is 0) and the
//! error code space mirrors the request code range.

/// Protocol version advertised in handshake and `protocol` responses.
pub const PROTOCOL_VERSION: i32 = 0x0000_0290;

/// Server role flag: this endpoint serves data directly.
pub const DATA_SERVER: i32 = 1;

/// Server role flag: redirector / load balancer.
pub const LOAD_BALANCER: i32 = 0;

/// The fixed 20-byte client hello sent before the first framed request,
/// five big-endian 32-bit words: `0 0 0 4 2012`.
pub const CLIENT_HANDSHAKE: [u8; 20] = [
    0, 0, 0, 0, //
    0, 0, 0, 0, //
    0, 0, 0, 0, //
    0, 0, 0, 4, //
    0, 0, 0x07, 0xdc,
];

/// Request codes (client to server).
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestCode {
    Close = 3003,
    Dirlist = 3004,
    Protocol = 3006,
    Login = 3007,
    Mkdir = 3008,
    Mv = 3009,
    Open = 3010,
    Ping = 3011,
    Read = 3013,
    Rm = 3014,
    Rmdir = 3015,
    Sync = 3016,
    Stat = 3017,
    Write = 3019,
    Prepare = 3021,
    Statx = 3022,
    ReadV = 3025,
    Locate = 3027,
}

impl RequestCode {
    /// Map a wire value onto a known request code. Unknown codes are not an
    /// error at this level; the dispatcher answers them with
    /// `kXR_Unsupported`.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            3003 => Some(RequestCode::Close),
            3004 => Some(RequestCode::Dirlist),
            3006 => Some(RequestCode::Protocol),
            3007 => Some(RequestCode::Login),
            3008 => Some(RequestCode::Mkdir),
            3009 => Some(RequestCode::Mv),
            3010 => Some(RequestCode::Open),
            3011 => Some(RequestCode::Ping),
            3013 => Some(RequestCode::Read),
            3014 => Some(RequestCode::Rm),
            3015 => Some(RequestCode::Rmdir),
            3016 => Some(RequestCode::Sync),
            3017 => Some(RequestCode::Stat),
            3019 => Some(RequestCode::Write),
            3021 => Some(RequestCode::Prepare),
            3022 => Some(RequestCode::Statx),
            3025 => Some(RequestCode::ReadV),
            3027 => Some(RequestCode::Locate),
            _ => None,
        }
    }
}

/// Response status codes (server to client).
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// Request completed; this is the final frame for the stream id.
    Ok = 0,
    /// Partial payload; more frames follow for the same stream id.
    OkSoFar = 4000,
    Attn = 4001,
    AuthMore = 4002,
    /// Body carries `errcode(4) | message | NUL`.
    Error = 4003,
    Redirect = 4004,
    Wait = 4005,
    WaitResp = 4006,
}

impl From<StatusCode> for u16 {
    fn from(status: StatusCode) -> u16 {
        status as u16
    }
}

/// Wire-visible error codes carried in `kXR_error` response bodies.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ArgInvalid = 3000,
    ArgMissing = 3001,
    ArgTooLong = 3002,
    FileLocked = 3003,
    FileNotOpen = 3004,
    FsError = 3005,
    InvalidRequest = 3006,
    IoError = 3007,
    NoMemory = 3008,
    NoSpace = 3009,
    NotAuthorized = 3010,
    NotFound = 3011,
    ServerError = 3012,
    Unsupported = 3013,
    NoServer = 3014,
    NotFile = 3015,
    IsDirectory = 3016,
    Cancelled = 3017,
}

/// File open options carried in the `open` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags(pub u16);

impl OpenFlags {
    pub const COMPRESS: u16 = 0x0001;
    pub const DELETE: u16 = 0x0002;
    pub const FORCE: u16 = 0x0004;
    pub const NEW: u16 = 0x0008;
    pub const OPEN_READ: u16 = 0x0010;
    pub const OPEN_UPDT: u16 = 0x0020;
    pub const REFRESH: u16 = 0x0080;
    pub const MKPATH: u16 = 0x0100;
    pub const OPEN_APND: u16 = 0x0200;
    pub const RETSTAT: u16 = 0x0400;

    /// Whether the file is to be opened writable. `kXR_new` and `kXR_delete`
    /// imply an update open even without `kXR_open_updt`.
    pub fn is_read_write(&self) -> bool {
        self.0 & (Self::OPEN_UPDT | Self::NEW | Self::DELETE) != 0
    }

    /// Fail unless the open creates the file.
    pub fn is_new(&self) -> bool {
        self.0 & Self::NEW != 0
    }

    /// Truncate an existing file on open.
    pub fn is_delete(&self) -> bool {
        self.0 & Self::DELETE != 0
    }

    /// Create missing parent directories.
    pub fn is_mkpath(&self) -> bool {
        self.0 & Self::MKPATH != 0
    }

    /// Include a `FileStatus` in the open response.
    pub fn is_retstat(&self) -> bool {
        self.0 & Self::RETSTAT != 0
    }
}

/// `FileStatus` flag bits used by `stat`, `statx` and `open`.
pub mod stat_flags {
    pub const X_SET: u32 = 0x01;
    pub const IS_DIR: u32 = 0x02;
    pub const OTHER: u32 = 0x04;
    pub const OFFLINE: u32 = 0x08;
    pub const READABLE: u32 = 0x10;
    pub const WRITABLE: u32 = 0x20;
}

/// File metadata as carried on the wire: an ASCII quadruple
/// `id size flags mtime`, NUL terminated. `id` is always 0 for a standalone
/// data server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStatus {
    pub id: u32,
    pub size: i64,
    pub flags: u32,
    pub mtime: i64,
}

impl FileStatus {
    pub fn new(size: i64, flags: u32, mtime: i64) -> Self {
        Self {
            id: 0,
            size,
            flags,
            mtime,
        }
    }

    /// Encode as the wire string, including the terminating NUL.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = format!("{} {} {} {}", self.id, self.size, self.flags, self.mtime)
            .into_bytes();
        out.push(0);
        out
    }
}
