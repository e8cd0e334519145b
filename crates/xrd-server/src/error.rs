//! Error types for the server runtime.
//!
//! Protocol-level failures are [`xrd_proto::XrootdError`] and are answered on
//! the wire; everything here terminates the connection (or, for `Config`,
//! prevents startup).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Frame(#[from] xrd_proto::FrameError),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}
