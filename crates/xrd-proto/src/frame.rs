//! Frame codec: one xrootd request or response per call.
//!
//! Request header, 24 bytes:
//! `stream_id(2) | request_code(2) | params(16) | dlen(4)`
//! followed by `dlen` bytes of payload.
//!
//! Response header, 8 bytes:
//! `stream_id(2) | status(2) | dlen(4)` followed by `dlen` bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FrameError;
use crate::protocol::{ErrorCode, StatusCode, DATA_SERVER, PROTOCOL_VERSION};

pub const REQUEST_HEADER_SIZE: usize = 24;
pub const RESPONSE_HEADER_SIZE: usize = 8;

/// One decoded client request frame. The 16 parameter bytes are opcode
/// specific and interpreted by [`crate::messages::Request::parse`].
#[derive(Debug, Clone)]
pub struct RequestFrame {
    pub stream_id: u16,
    pub request_code: u16,
    pub params: [u8; 16],
    pub body: Bytes,
}

impl RequestFrame {
    /// Decode exactly one frame from a byte slice, advancing it past the
    /// consumed bytes.
    pub fn decode(buf: &mut &[u8], max_body: u32) -> Result<Self, FrameError> {
        if buf.remaining() < REQUEST_HEADER_SIZE {
            return Err(FrameError::ShortFrame("request header"));
        }
        let stream_id = buf.get_u16();
        let request_code = buf.get_u16();
        let mut params = [0u8; 16];
        buf.copy_to_slice(&mut params);
        let dlen = buf.get_i32();
        if dlen < 0 || dlen as u32 > max_body {
            return Err(FrameError::BadLength {
                len: dlen as i64,
                max: max_body,
            });
        }
        if buf.remaining() < dlen as usize {
            return Err(FrameError::ShortFrame("request body"));
        }
        let body = Bytes::copy_from_slice(&buf[..dlen as usize]);
        buf.advance(dlen as usize);
        Ok(Self {
            stream_id,
            request_code,
            params,
            body,
        })
    }

    /// Read one frame from a stream. Returns `Ok(None)` on a clean end of
    /// stream (connection closed between requests); ending mid-header or
    /// mid-body is a [`FrameError::ShortFrame`].
    pub async fn read_from<R>(reader: &mut R, max_body: u32) -> Result<Option<Self>, FrameError>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; REQUEST_HEADER_SIZE];
        let mut filled = 0;
        while filled < header.len() {
            let n = reader.read(&mut header[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(FrameError::ShortFrame("request header"));
            }
            filled += n;
        }

        let mut buf = &header[..];
        let stream_id = buf.get_u16();
        let request_code = buf.get_u16();
        let mut params = [0u8; 16];
        buf.copy_to_slice(&mut params);
        let dlen = buf.get_i32();
        if dlen < 0 || dlen as u32 > max_body {
            return Err(FrameError::BadLength {
                len: dlen as i64,
                max: max_body,
            });
        }

        let mut body = vec![0u8; dlen as usize];
        reader.read_exact(&mut body).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                FrameError::ShortFrame("request body")
            } else {
                FrameError::Io(e)
            }
        })?;

        Ok(Some(Self {
            stream_id,
            request_code,
            params,
            body: body.into(),
        }))
    }

    /// Encode the frame (used by test clients).
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(REQUEST_HEADER_SIZE + self.body.len());
        buf.put_u16(self.stream_id);
        buf.put_u16(self.request_code);
        buf.put_slice(&self.params);
        buf.put_i32(self.body.len() as i32);
        buf.put_slice(&self.body);
        buf
    }
}

/// One decoded server response frame.
#[derive(Debug, Clone)]
pub struct ResponseFrame {
    pub stream_id: u16,
    pub status: u16,
    pub body: Bytes,
}

impl ResponseFrame {
    /// Decode exactly one frame from a byte slice, advancing it.
    pub fn decode(buf: &mut &[u8]) -> Result<Self, FrameError> {
        if buf.remaining() < RESPONSE_HEADER_SIZE {
            return Err(FrameError::ShortFrame("response header"));
        }
        let stream_id = buf.get_u16();
        let status = buf.get_u16();
        let dlen = buf.get_i32();
        if dlen < 0 {
            return Err(FrameError::BadLength {
                len: dlen as i64,
                max: u32::MAX,
            });
        }
        if buf.remaining() < dlen as usize {
            return Err(FrameError::ShortFrame("response body"));
        }
        let body = Bytes::copy_from_slice(&buf[..dlen as usize]);
        buf.advance(dlen as usize);
        Ok(Self {
            stream_id,
            status,
            body,
        })
    }

    /// Read one response frame from a stream (used by test clients).
    pub async fn read_from<R>(reader: &mut R) -> Result<Self, FrameError>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; RESPONSE_HEADER_SIZE];
        reader.read_exact(&mut header).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                FrameError::ShortFrame("response header")
            } else {
                FrameError::Io(e)
            }
        })?;
        let mut buf = &header[..];
        let stream_id = buf.get_u16();
        let status = buf.get_u16();
        let dlen = buf.get_i32();
        if dlen < 0 {
            return Err(FrameError::BadLength {
                len: dlen as i64,
                max: u32::MAX,
            });
        }
        let mut body = vec![0u8; dlen as usize];
        reader.read_exact(&mut body).await?;
        Ok(Self {
            stream_id,
            status,
            body: body.into(),
        })
    }
}

/// Encode a response header into `buf`.
pub fn put_response_header(buf: &mut BytesMut, stream_id: u16, status: StatusCode, dlen: u32) {
    buf.put_u16(stream_id);
    buf.put_u16(status.into());
    buf.put_u32(dlen);
}

/// Write a complete single response frame.
pub async fn write_frame<W>(
    writer: &mut W,
    stream_id: u16,
    status: StatusCode,
    body: &[u8],
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(RESPONSE_HEADER_SIZE + body.len());
    put_response_header(&mut buf, stream_id, status, body.len() as u32);
    buf.put_slice(body);
    writer.write_all(&buf).await?;
    writer.flush().await
}

/// Write a `kXR_error` frame: `errcode(4) | UTF-8 message | NUL`.
pub async fn write_error<W>(
    writer: &mut W,
    stream_id: u16,
    code: ErrorCode,
    message: &str,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut body = BytesMut::with_capacity(4 + message.len() + 1);
    body.put_i32(code as u16 as i32);
    body.put_slice(message.as_bytes());
    body.put_u8(0);
    write_frame(writer, stream_id, StatusCode::Error, &body).await
}

/// Write the 16-byte handshake response: an 8-byte header on stream 0
/// followed by `(protocol_version, server_type)`.
pub async fn write_handshake_response<W>(writer: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut body = BytesMut::with_capacity(8);
    body.put_i32(PROTOCOL_VERSION);
    body.put_i32(DATA_SERVER);
    write_frame(writer, 0, StatusCode::Ok, &body).await
}
