//! # xrd-server
//!
//! An xrootd data server: accepts framed protocol requests over TCP,
//! dispatches them to file-system-backed handlers rooted under a configured
//! directory, and streams large read payloads in bounded frames, optionally
//! handing file regions straight to the kernel.
//!
//! The wire protocol lives in [`xrd_proto`]; the GSI authentication
//! primitives in [`xrd_gsi`].

pub mod config;
pub mod error;
pub mod files;
pub mod handler;
pub mod path;
pub mod server;
pub mod stream;

pub use config::{DataServerConfig, LogFormat, LoggingConfig};
pub use error::{Error, Result};
pub use files::{FileTable, OpenFile};
pub use handler::{DataServerHandler, Reply};
pub use server::Server;
