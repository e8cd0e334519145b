//! Listener and per-connection driver.
//!
//! Each accepted connection runs as its own task and is request-synchronous:
//! a request is fully answered, chunk by chunk if need be, before the next
//! header is read. Responses on one connection therefore appear in request
//! order, and the frames of one response are contiguous.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use xrd_proto::frame::{self, RequestFrame};
use xrd_proto::messages::Request;
use xrd_proto::protocol::CLIENT_HANDSHAKE;

use crate::config::DataServerConfig;
use crate::error::{Error, Result};
use crate::handler::{DataServerHandler, Reply};
use crate::stream;

/// The xrootd data server.
pub struct Server {
    config: Arc<DataServerConfig>,
}

impl Server {
    pub fn new(config: DataServerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Bind the configured address and serve until interrupted.
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener until ctrl-c.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, root = %self.config.root_dir.display(), "Data server listening");

        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let mut connection_id = 0u64;

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Shutdown signal received");
                    break;
                }
                accepted = listener.accept() => {
                    let (socket, peer) = accepted?;
                    connection_id += 1;
                    let connection = Connection {
                        stream: socket,
                        peer,
                        config: self.config.clone(),
                        handler: DataServerHandler::new(
                            self.config.clone(),
                            local_addr,
                            connection_id,
                        ),
                    };
                    let token = shutdown.child_token();
                    tracker.spawn(async move {
                        debug!(peer = %connection.peer, "Connection established");
                        if let Err(e) = connection.run(token).await {
                            warn!(error = %e, "Connection terminated with error");
                        }
                    });
                }
            }
        }

        // fan out shutdown and wait for connections to drain
        shutdown.cancel();
        tracker.close();
        tracker.wait().await;
        info!("Data server stopped");
        Ok(())
    }
}

/// One client connection: socket, handler and open-file table. Dropping the
/// connection releases every file it owns.
struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    config: Arc<DataServerConfig>,
    handler: DataServerHandler,
}

impl Connection {
    async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        self.handshake().await?;

        let idle = self.config.idle_timeout();
        let max_body = self.config.max_body_size;
        loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(peer = %self.peer, "Closing connection on shutdown");
                    return Ok(());
                }
                read = timeout(idle, RequestFrame::read_from(&mut self.stream, max_body)) => {
                    match read {
                        Err(_) => {
                            info!(peer = %self.peer, "Closing idle connection");
                            return Ok(());
                        }
                        Ok(Ok(None)) => {
                            debug!(peer = %self.peer, "Connection closed by peer");
                            return Ok(());
                        }
                        Ok(Ok(Some(frame))) => frame,
                        // framing errors leave the stream position
                        // unreliable and terminate the connection
                        Ok(Err(e)) => return Err(e.into()),
                    }
                }
            };

            let request = match Request::parse(&frame) {
                Ok(request) => request,
                Err(e) => {
                    debug!(peer = %self.peer, error = %e, "Rejecting malformed request");
                    frame::write_error(&mut self.stream, frame.stream_id, e.code, &e.message)
                        .await?;
                    continue;
                }
            };

            self.process(request).await?;
        }
    }

    /// Validate the fixed 20-byte client hello and answer with the protocol
    /// version and server role.
    async fn handshake(&mut self) -> Result<()> {
        use tokio::io::AsyncReadExt;

        let mut hello = [0u8; CLIENT_HANDSHAKE.len()];
        match timeout(self.config.idle_timeout(), self.stream.read_exact(&mut hello)).await {
            Err(_) => return Err(Error::Connection("handshake timed out".into())),
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(_)) => {}
        }
        if hello != CLIENT_HANDSHAKE {
            return Err(Error::Connection("invalid client handshake".into()));
        }
        frame::write_handshake_response(&mut self.stream).await?;
        debug!(peer = %self.peer, "Handshake complete");
        Ok(())
    }

    async fn process(&mut self, request: Request) -> Result<()> {
        let stream_id = request.stream_id;
        match self.handler.handle(&request.op).await {
            Ok(Reply::Complete(response)) => {
                let (status, body) = response.encode();
                frame::write_frame(&mut self.stream, stream_id, status, &body).await?;
            }
            Ok(Reply::Read { fd, offset, len }) => {
                self.send_read_reply(stream_id, fd, offset, len).await?;
            }
            Ok(Reply::ReadV { requests }) => {
                stream::send_readv(
                    &mut self.stream,
                    stream_id,
                    &mut self.handler.files,
                    &requests,
                    self.config.max_frame_size as usize,
                )
                .await?;
            }
            Err(e) => {
                debug!(peer = %self.peer, error = %e, "Request failed");
                frame::write_error(&mut self.stream, stream_id, e.code, &e.message).await?;
            }
        }
        Ok(())
    }

    async fn send_read_reply(
        &mut self,
        stream_id: u16,
        fd: u32,
        offset: u64,
        len: u32,
    ) -> Result<()> {
        if self.config.use_zero_copy
            && len > 0
            && self.try_zero_copy(stream_id, fd, offset, len).await?
        {
            return Ok(());
        }

        let max_frame = self.config.max_frame_size as usize;
        let entry = match self.handler.files.get_mut(fd) {
            Ok(entry) => entry,
            Err(e) => {
                frame::write_error(&mut self.stream, stream_id, e.code, &e.message).await?;
                return Ok(());
            }
        };
        stream::send_read(
            &mut self.stream,
            stream_id,
            &mut entry.file,
            offset,
            len,
            max_frame,
        )
        .await?;
        Ok(())
    }

    /// Hand the file region to the kernel where the platform supports it.
    /// Returns false to fall back to buffered chunking.
    #[cfg(target_os = "linux")]
    async fn try_zero_copy(
        &mut self,
        stream_id: u16,
        fd: u32,
        offset: u64,
        len: u32,
    ) -> Result<bool> {
        let entry = match self.handler.files.get(fd) {
            Ok(entry) => entry,
            Err(_) => return Ok(false),
        };
        let std_file = match entry.file.try_clone().await {
            Ok(clone) => clone.into_std().await,
            Err(e) => {
                warn!(error = %e, "Zero-copy clone failed, falling back to buffered read");
                return Ok(false);
            }
        };
        stream::send_file_region(&mut self.stream, &std_file, stream_id, offset, len).await?;
        Ok(true)
    }

    #[cfg(not(target_os = "linux"))]
    async fn try_zero_copy(
        &mut self,
        _stream_id: u16,
        _fd: u32,
        _offset: u64,
        _len: u32,
    ) -> Result<bool> {
        Ok(false)
    }
}
