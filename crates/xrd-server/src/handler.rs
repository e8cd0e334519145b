//! Per-opcode request handling.
//!
//! One handler exists per connection and owns the connection's open-file
//! table. Each operation either produces a single-frame [`Response`], a
//! streamed read plan the transport materializes, or an [`XrootdError`]
//! that the dispatcher converts into one `kXR_error` frame.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use bytes::Bytes;
use std::io::SeekFrom;
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use xrd_proto::messages::{EmbeddedReadRequest, LocateInfo, Op, Response};
use xrd_proto::protocol::{
    stat_flags, ErrorCode, FileStatus, OpenFlags, DATA_SERVER, PROTOCOL_VERSION,
};
use xrd_proto::XrootdError;

use crate::config::DataServerConfig;
use crate::files::{FileTable, OpenFile};
use crate::path;

/// Outcome of a handled request. Read payloads are deliberately not
/// materialized here: the transport decides between buffered chunking and
/// zero-copy emission.
#[derive(Debug)]
pub enum Reply {
    /// A single response frame.
    Complete(Response),
    /// Stream `len` bytes of the open file `fd` from `offset`.
    Read { fd: u32, offset: u64, len: u32 },
    /// Stream a validated vector of embedded reads.
    ReadV { requests: Vec<EmbeddedReadRequest> },
}

/// Request handler for one connection.
pub struct DataServerHandler {
    config: Arc<DataServerConfig>,
    local_addr: SocketAddr,
    connection_id: u64,
    pub files: FileTable,
}

impl DataServerHandler {
    pub fn new(config: Arc<DataServerConfig>, local_addr: SocketAddr, connection_id: u64) -> Self {
        Self {
            config,
            local_addr,
            connection_id,
            files: FileTable::new(),
        }
    }

    /// Dispatch one decoded operation.
    pub async fn handle(&mut self, op: &Op) -> Result<Reply, XrootdError> {
        match op {
            Op::Protocol { client_pv } => {
                debug!(client_pv, "Protocol negotiation");
                Ok(Reply::Complete(Response::Protocol {
                    version: PROTOCOL_VERSION,
                    flags: DATA_SERVER,
                }))
            }
            Op::Login { pid, username } => self.handle_login(*pid, username),
            Op::Ping => Ok(Reply::Complete(Response::Ok)),
            Op::Stat { path } => self.handle_stat(path).await,
            Op::Statx { paths } => self.handle_statx(paths).await,
            Op::Rm { path } => self.handle_rm(path).await,
            Op::Rmdir { path } => self.handle_rmdir(path).await,
            Op::Mkdir { path, mkpath, .. } => self.handle_mkdir(path, *mkpath).await,
            Op::Mv { source, target } => self.handle_mv(source, target).await,
            Op::Dirlist { path } => self.handle_dirlist(path).await,
            Op::Prepare => Ok(Reply::Complete(Response::Ok)),
            Op::Open {
                path,
                mode: _,
                options,
            } => self.handle_open(path, *options).await,
            Op::Read { fd, offset, len } => self.handle_read(*fd, *offset, *len),
            Op::ReadV { requests } => self.handle_readv(requests).await,
            Op::Write { fd, offset, data } => self.handle_write(*fd, *offset, data).await,
            Op::Sync { fd } => self.handle_sync(*fd).await,
            Op::Close { fd } => self.handle_close(*fd),
            Op::Locate { path, .. } => self.handle_locate(path).await,
            Op::Unsupported { code } => Err(XrootdError::new(
                ErrorCode::Unsupported,
                format!("Unsupported request code: {code}"),
            )),
        }
    }

    fn handle_login(&mut self, pid: i32, username: &str) -> Result<Reply, XrootdError> {
        debug!(pid, username, "Client login");
        let mut session = [0u8; 16];
        session[0..4].copy_from_slice(&pid.to_be_bytes());
        session[4..12].copy_from_slice(&self.connection_id.to_be_bytes());
        Ok(Reply::Complete(Response::Login { session }))
    }

    async fn handle_stat(&self, path: &str) -> Result<Reply, XrootdError> {
        let resolved = self.resolve(path)?;
        let status = self.file_status(&resolved).await?;
        Ok(Reply::Complete(Response::Stat(status)))
    }

    async fn handle_statx(&self, paths: &[String]) -> Result<Reply, XrootdError> {
        if paths.is_empty() {
            return Err(XrootdError::new(ErrorCode::ArgMissing, "no paths specified"));
        }
        let mut flags = Vec::with_capacity(paths.len());
        for path in paths {
            let resolved = self.resolve(path)?;
            let flag = match fs::metadata(&resolved).await {
                Ok(meta) => status_flags(&meta),
                Err(_) => stat_flags::OTHER,
            };
            flags.push(flag as u8);
        }
        Ok(Reply::Complete(Response::Statx { flags }))
    }

    async fn handle_rm(&self, path: &str) -> Result<Reply, XrootdError> {
        if path.is_empty() {
            return Err(XrootdError::new(ErrorCode::ArgMissing, "no path specified"));
        }
        let resolved = self.resolve(path)?;
        let meta = fs::metadata(&resolved).await.map_err(|_| {
            XrootdError::new(
                ErrorCode::NotFound,
                format!("No such directory or file: {path}"),
            )
        })?;
        if !meta.is_file() {
            return Err(XrootdError::new(
                ErrorCode::NotFile,
                format!("Not a file: {path}"),
            ));
        }
        fs::remove_file(&resolved)
            .await
            .map_err(|e| io_error(e, "Failed to delete file"))?;
        Ok(Reply::Complete(Response::Ok))
    }

    async fn handle_rmdir(&self, path: &str) -> Result<Reply, XrootdError> {
        if path.is_empty() {
            return Err(XrootdError::new(ErrorCode::ArgMissing, "no path specified"));
        }
        let resolved = self.resolve(path)?;
        let meta = fs::metadata(&resolved).await.map_err(|_| {
            XrootdError::new(
                ErrorCode::NotFound,
                format!("No such directory or file: {path}"),
            )
        })?;
        if !meta.is_dir() {
            return Err(XrootdError::new(
                ErrorCode::IoError,
                format!("Not a directory: {path}"),
            ));
        }
        fs::remove_dir(&resolved)
            .await
            .map_err(|e| io_error(e, "Failed to delete directory"))?;
        Ok(Reply::Complete(Response::Ok))
    }

    async fn handle_mkdir(&self, path: &str, mkpath: bool) -> Result<Reply, XrootdError> {
        if path.is_empty() {
            return Err(XrootdError::new(ErrorCode::ArgMissing, "no path specified"));
        }
        let resolved = self.resolve(path)?;
        if fs::metadata(&resolved).await.is_ok() {
            return Err(XrootdError::new(
                ErrorCode::IoError,
                format!("Path exists: {path}"),
            ));
        }
        let result = if mkpath {
            fs::create_dir_all(&resolved).await
        } else {
            fs::create_dir(&resolved).await
        };
        result.map_err(|e| io_error(e, "Failed to create directory"))?;
        Ok(Reply::Complete(Response::Ok))
    }

    async fn handle_mv(&self, source: &str, target: &str) -> Result<Reply, XrootdError> {
        if source.is_empty() {
            return Err(XrootdError::new(
                ErrorCode::ArgMissing,
                "No source path specified",
            ));
        }
        if target.is_empty() {
            return Err(XrootdError::new(
                ErrorCode::ArgMissing,
                "No target path specified",
            ));
        }
        let resolved_source = self.resolve(source)?;
        let resolved_target = self.resolve(target)?;
        if fs::metadata(&resolved_source).await.is_err() {
            return Err(XrootdError::new(ErrorCode::NotFound, "No such file"));
        }
        fs::rename(&resolved_source, &resolved_target)
            .await
            .map_err(|e| io_error(e, "Failed to move file"))?;
        Ok(Reply::Complete(Response::Ok))
    }

    async fn handle_dirlist(&self, path: &str) -> Result<Reply, XrootdError> {
        if path.is_empty() {
            return Err(XrootdError::new(
                ErrorCode::ArgMissing,
                "no source path specified",
            ));
        }
        let resolved = self.resolve(path)?;
        let mut entries = fs::read_dir(&resolved).await.map_err(|_| {
            XrootdError::new(ErrorCode::NotFound, format!("No such directory: {path}"))
        })?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(e, "Failed to list directory"))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(Reply::Complete(Response::Dirlist { names }))
    }

    async fn handle_open(&mut self, path: &str, options: OpenFlags) -> Result<Reply, XrootdError> {
        let resolved = self.resolve(path)?;
        if let Ok(meta) = fs::metadata(&resolved).await {
            if meta.is_dir() {
                return Err(XrootdError::new(
                    ErrorCode::IsDirectory,
                    format!("Not a file: {path}"),
                ));
            }
        }

        let read_write = options.is_read_write();
        if read_write && options.is_mkpath() {
            if let Some(parent) = resolved.parent() {
                if fs::metadata(parent).await.is_err() {
                    fs::create_dir_all(parent)
                        .await
                        .map_err(|e| io_error(e, "Failed to create directories"))?;
                }
            }
        }

        let mut open_options = fs::OpenOptions::new();
        if read_write {
            open_options.read(true).write(true);
            if options.is_new() {
                open_options.create_new(true);
            } else {
                open_options.create(true);
            }
        } else {
            open_options.read(true);
        }

        let file = open_options.open(&resolved).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => XrootdError::new(ErrorCode::NotFound, "No such file"),
            std::io::ErrorKind::AlreadyExists => XrootdError::new(
                ErrorCode::IoError,
                format!("Failed to create file: {path}"),
            ),
            _ => io_error(e, "Failed to open file"),
        })?;

        // any failure below this point drops (and thereby closes) the
        // partially opened handle before the error reaches the wire
        if read_write && options.is_delete() {
            file.set_len(0)
                .await
                .map_err(|e| io_error(e, "Failed to truncate file"))?;
        }

        let status = if options.is_retstat() {
            Some(self.file_status(&resolved).await?)
        } else {
            None
        };

        let fd = self.files.add(OpenFile {
            file,
            path: resolved,
        });
        debug!(fd, path, "File opened");
        Ok(Reply::Complete(Response::Open { fd, status }))
    }

    fn handle_read(&mut self, fd: u32, offset: i64, len: u32) -> Result<Reply, XrootdError> {
        if offset < 0 {
            return Err(XrootdError::new(
                ErrorCode::ArgInvalid,
                format!("Negative read offset: {offset}"),
            ));
        }
        self.files.get(fd)?;
        Ok(Reply::Read {
            fd,
            offset: offset as u64,
            len,
        })
    }

    async fn handle_readv(
        &mut self,
        requests: &[EmbeddedReadRequest],
    ) -> Result<Reply, XrootdError> {
        if requests.is_empty() {
            return Err(XrootdError::new(
                ErrorCode::ArgMissing,
                "Request contains no vector",
            ));
        }
        for request in requests {
            let entry = self.files.get(request.fd)?;
            let meta = entry
                .file
                .metadata()
                .await
                .map_err(|e| io_error(e, "Failed to stat open file"))?;
            let end = request.offset as u64 + request.len as u64;
            if end > meta.len() {
                return Err(XrootdError::new(
                    ErrorCode::IoError,
                    format!(
                        "Read vector extends past end of file: {}",
                        entry.path.display()
                    ),
                ));
            }
        }
        Ok(Reply::ReadV {
            requests: requests.to_vec(),
        })
    }

    async fn handle_write(
        &mut self,
        fd: u32,
        offset: i64,
        data: &Bytes,
    ) -> Result<Reply, XrootdError> {
        if offset < 0 {
            return Err(XrootdError::new(
                ErrorCode::ArgInvalid,
                format!("Negative write offset: {offset}"),
            ));
        }
        let entry = self.files.get_mut(fd)?;
        entry
            .file
            .seek(SeekFrom::Start(offset as u64))
            .await
            .map_err(|e| io_error(e, "Failed to seek"))?;
        entry
            .file
            .write_all(data)
            .await
            .map_err(|e| io_error(e, "Failed to write"))?;
        Ok(Reply::Complete(Response::Ok))
    }

    async fn handle_sync(&mut self, fd: u32) -> Result<Reply, XrootdError> {
        let entry = self.files.get_mut(fd)?;
        entry
            .file
            .sync_all()
            .await
            .map_err(|e| io_error(e, "Failed to sync"))?;
        Ok(Reply::Complete(Response::Ok))
    }

    fn handle_close(&mut self, fd: u32) -> Result<Reply, XrootdError> {
        let entry = self.files.remove(fd)?;
        debug!(fd, path = %entry.path.display(), "File closed");
        Ok(Reply::Complete(Response::Ok))
    }

    async fn handle_locate(&self, path: &str) -> Result<Reply, XrootdError> {
        let path = path.strip_prefix('*').unwrap_or(path);
        let resolved = self.resolve(path)?;
        let info = match fs::metadata(&resolved).await {
            Ok(meta) => Some(LocateInfo {
                addr: self.local_addr,
                writable: is_writable(&meta),
            }),
            Err(_) => None,
        };
        Ok(Reply::Complete(Response::Locate(info)))
    }

    fn resolve(&self, client_path: &str) -> Result<PathBuf, XrootdError> {
        path::resolve(&self.config.root_dir, client_path)
    }

    async fn file_status(&self, path: &Path) -> Result<FileStatus, XrootdError> {
        let meta = fs::metadata(path)
            .await
            .map_err(|_| XrootdError::new(ErrorCode::NotFound, "No such file"))?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Ok(FileStatus::new(meta.len() as i64, status_flags(&meta), mtime))
    }
}

#[cfg(unix)]
fn status_flags(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;

    let mut flags = 0;
    if meta.is_dir() {
        flags |= stat_flags::IS_DIR;
    }
    if !meta.is_file() && !meta.is_dir() {
        flags |= stat_flags::OTHER;
    }
    let mode = meta.permissions().mode();
    if mode & 0o111 != 0 {
        flags |= stat_flags::X_SET;
    }
    if mode & 0o444 != 0 {
        flags |= stat_flags::READABLE;
    }
    if mode & 0o222 != 0 {
        flags |= stat_flags::WRITABLE;
    }
    flags
}

#[cfg(not(unix))]
fn status_flags(meta: &std::fs::Metadata) -> u32 {
    let mut flags = 0;
    if meta.is_dir() {
        flags |= stat_flags::IS_DIR;
    }
    if !meta.is_file() && !meta.is_dir() {
        flags |= stat_flags::OTHER;
    }
    flags |= stat_flags::READABLE;
    if !meta.permissions().readonly() {
        flags |= stat_flags::WRITABLE;
    }
    flags
}

#[cfg(unix)]
fn is_writable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o222 != 0
}

#[cfg(not(unix))]
fn is_writable(meta: &std::fs::Metadata) -> bool {
    !meta.permissions().readonly()
}

fn io_error(e: std::io::Error, context: &str) -> XrootdError {
    XrootdError::new(ErrorCode::IoError, format!("{context}: {e}"))
}
