//! Streaming of read payloads.
//!
//! Read and readv responses are emitted as a sequence of frames of at most
//! `max_frame` payload bytes, every frame but the last carrying
//! `kXR_oksofar`. Frames of one response are strictly ordered and never
//! interleave with other traffic on the connection; the writer task yields
//! between chunks so one slow client cannot monopolize the runtime.
//!
//! On Linux the whole payload of a plain `read` can instead be handed to the
//! kernel as a file region (`sendfile(2)`): a single `kXR_ok` header
//! announcing the full length, then zero-copy transfer.

use bytes::{BufMut, BytesMut};
use std::io::SeekFrom;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite};

use xrd_proto::frame;
use xrd_proto::messages::EmbeddedReadRequest;
use xrd_proto::protocol::StatusCode;

use crate::files::FileTable;

/// Stream `len` bytes of `file` starting at `offset`. A zero-length request
/// or one that starts at or past end of file still produces exactly one
/// `kXR_ok` frame; hitting end of file mid-request ends the stream early
/// with whatever was read.
pub async fn send_read<W>(
    writer: &mut W,
    stream_id: u16,
    file: &mut File,
    offset: u64,
    len: u32,
    max_frame: usize,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if len == 0 {
        return frame::write_frame(writer, stream_id, StatusCode::Ok, &[]).await;
    }

    file.seek(SeekFrom::Start(offset)).await?;

    let mut remaining = len as usize;
    let mut chunk = vec![0u8; max_frame.min(remaining)];
    loop {
        let want = remaining.min(max_frame);
        let filled = read_up_to(file, &mut chunk[..want]).await?;
        remaining -= filled;

        let last = filled < want || remaining == 0;
        let status = if last {
            StatusCode::Ok
        } else {
            StatusCode::OkSoFar
        };
        frame::write_frame(writer, stream_id, status, &chunk[..filled]).await?;
        if last {
            return Ok(());
        }
        tokio::task::yield_now().await;
    }
}

/// Stream a vector read: each element is prefixed with its 16-byte embedded
/// response header, elements are concatenated in request order, and frame
/// boundaries may fall anywhere inside an element.
///
/// Descriptors and ranges are validated by the handler before streaming
/// starts; a failure here (a file shrinking mid-flight) is a connection
/// error, since partial frames are already on the wire.
pub async fn send_readv<W>(
    writer: &mut W,
    stream_id: u16,
    files: &mut FileTable,
    requests: &[EmbeddedReadRequest],
    max_frame: usize,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total: u64 = requests
        .iter()
        .map(|r| EmbeddedReadRequest::WIRE_SIZE as u64 + r.len as u64)
        .sum();
    let mut out = FrameWriter::new(writer, stream_id, max_frame, total);

    let mut read_buf = vec![0u8; max_frame.min(64 * 1024)];
    for request in requests {
        let mut header = BytesMut::with_capacity(EmbeddedReadRequest::WIRE_SIZE);
        request.encode_header(&mut header);
        out.push(&header).await?;

        let entry = files
            .get_mut(request.fd)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        entry.file.seek(SeekFrom::Start(request.offset as u64)).await?;

        let mut remaining = request.len as usize;
        while remaining > 0 {
            let want = remaining.min(read_buf.len());
            entry.file.read_exact(&mut read_buf[..want]).await?;
            out.push(&read_buf[..want]).await?;
            remaining -= want;
        }
    }
    out.finish().await
}

/// Accumulates payload bytes into frames of at most `max_frame` bytes,
/// flushing full frames as `kXR_oksofar` while more payload is pending and
/// ending the stream with a single `kXR_ok` frame.
struct FrameWriter<'w, W> {
    writer: &'w mut W,
    stream_id: u16,
    max_frame: usize,
    buf: BytesMut,
    pending: u64,
}

impl<'w, W> FrameWriter<'w, W>
where
    W: AsyncWrite + Unpin,
{
    fn new(writer: &'w mut W, stream_id: u16, max_frame: usize, total: u64) -> Self {
        Self {
            writer,
            stream_id,
            max_frame,
            buf: BytesMut::with_capacity(max_frame.min(total as usize)),
            pending: total,
        }
    }

    async fn push(&mut self, mut data: &[u8]) -> std::io::Result<()> {
        while !data.is_empty() {
            let space = self.max_frame - self.buf.len();
            let take = space.min(data.len());
            self.buf.put_slice(&data[..take]);
            data = &data[take..];
            self.pending -= take as u64;

            if self.buf.len() == self.max_frame && self.pending > 0 {
                frame::write_frame(self.writer, self.stream_id, StatusCode::OkSoFar, &self.buf)
                    .await?;
                self.buf.clear();
                tokio::task::yield_now().await;
            }
        }
        Ok(())
    }

    async fn finish(self) -> std::io::Result<()> {
        frame::write_frame(self.writer, self.stream_id, StatusCode::Ok, &self.buf).await
    }
}

async fn read_up_to<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Zero-copy emission of a read payload: the `kXR_ok` header announces the
/// full length, then the file region goes out through `sendfile(2)` without
/// touching user space.
#[cfg(target_os = "linux")]
pub async fn send_file_region(
    stream: &mut tokio::net::TcpStream,
    file: &std::fs::File,
    stream_id: u16,
    offset: u64,
    len: u32,
) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;
    use tokio::io::{AsyncWriteExt, Interest};

    let mut header = BytesMut::with_capacity(frame::RESPONSE_HEADER_SIZE);
    frame::put_response_header(&mut header, stream_id, StatusCode::Ok, len);
    stream.write_all(&header).await?;
    stream.flush().await?;

    let out_fd = stream.as_raw_fd();
    let in_fd = file.as_raw_fd();
    let mut file_offset = offset as libc::off_t;
    let mut remaining = len as usize;
    while remaining > 0 {
        stream.writable().await?;
        let sent = stream.try_io(Interest::WRITABLE, || {
            let n = unsafe { libc::sendfile(out_fd, in_fd, &mut file_offset, remaining) };
            if n < 0 {
                Err(std::io::Error::last_os_error())
            } else {
                Ok(n as usize)
            }
        });
        match sent {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "file region ended before the announced length",
                ));
            }
            Ok(n) => remaining -= n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
