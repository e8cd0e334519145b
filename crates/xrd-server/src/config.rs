//! Data server configuration.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Data server configuration, loadable from a TOML file with every field
/// optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataServerConfig {
    /// Bind address for the listener.
    pub bind_address: String,

    /// Listener port (1094 is the registered xrootd port).
    pub port: u16,

    /// Directory all client paths are resolved under.
    pub root_dir: PathBuf,

    /// Hand read payloads to the kernel as file regions instead of copying
    /// them through a user-space buffer. Ignored on platforms without
    /// `sendfile(2)` support.
    pub use_zero_copy: bool,

    /// Maximum payload bytes per read/readv response frame.
    pub max_frame_size: u32,

    /// Cap on request body length; larger frames terminate the connection.
    pub max_body_size: u32,

    /// Connections idle longer than this are closed.
    pub idle_timeout_secs: u64,

    /// Directory of trusted CA certificates for the GSI flow. Absent means
    /// the trust-anchor store is not started.
    pub ca_path: Option<PathBuf>,

    /// Trust-anchor reload interval.
    pub trust_anchor_refresh_secs: u64,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Default for DataServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 1094,
            root_dir: PathBuf::from("/var/lib/xrd"),
            use_zero_copy: false,
            max_frame_size: 2 << 20,
            max_body_size: 8 << 20,
            idle_timeout_secs: 300,
            ca_path: None,
            trust_anchor_refresh_secs: 3600,
            logging: LoggingConfig::default(),
        }
    }
}

impl DataServerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {e}")))
    }

    /// Validate configuration before the server starts. A failure here is a
    /// startup error, not a per-request one.
    pub fn validate(&self) -> Result<()> {
        if !self.root_dir.is_absolute() {
            return Err(Error::Config(format!(
                "root_dir must be an absolute path: {}",
                self.root_dir.display()
            )));
        }
        if !self.root_dir.is_dir() {
            return Err(Error::Config(format!(
                "root_dir does not exist or is not a directory: {}",
                self.root_dir.display()
            )));
        }
        if self.max_frame_size == 0 {
            return Err(Error::Config("max_frame_size must be non-zero".into()));
        }
        if self.max_body_size == 0 {
            return Err(Error::Config("max_body_size must be non-zero".into()));
        }
        if self.idle_timeout_secs == 0 {
            return Err(Error::Config("idle_timeout_secs must be non-zero".into()));
        }
        if let Some(ca_path) = &self.ca_path {
            if !ca_path.is_dir() {
                return Err(Error::Config(format!(
                    "ca_path does not exist or is not a directory: {}",
                    ca_path.display()
                )));
            }
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error).
    pub level: String,
    /// Log output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Log format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text for human readability.
    Text,
    /// Structured JSON for log aggregation.
    Json,
}
