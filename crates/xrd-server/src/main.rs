//! xrootd data server binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use xrd_gsi::TrustAnchorStore;
use xrd_server::{DataServerConfig, LogFormat, Server};

#[derive(Parser, Debug)]
#[command(author, version, about = "xrootd data server", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Root directory served to clients
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Send read payloads with zero-copy file regions
    #[arg(long)]
    zero_copy: bool,

    /// Verbose logging (debug level)
    #[arg(short, long)]
    verbose: bool,

    /// Log format (text or json)
    #[arg(long)]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut config = match args.config {
        Some(path) => match DataServerConfig::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config: {e}");
                std::process::exit(1);
            }
        },
        None => DataServerConfig::default(),
    };

    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(root) = args.root {
        config.root_dir = root;
    }
    if args.zero_copy {
        config.use_zero_copy = true;
    }
    if args.verbose {
        config.logging.level = "debug".to_string();
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(EnvFilter::new(config.logging.level.clone()))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::new(config.logging.level.clone()))
                .init();
        }
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        root = %config.root_dir.display(),
        zero_copy = config.use_zero_copy,
        "Starting xrootd data server"
    );

    if !config.root_dir.exists() {
        if let Err(e) = std::fs::create_dir_all(&config.root_dir) {
            error!(
                root = %config.root_dir.display(),
                error = %e,
                "Failed to create root directory"
            );
            std::process::exit(1);
        }
    }

    // the trust-anchor refresher runs for the lifetime of the process and
    // publishes snapshots the GSI handlers read without locking
    let _anchors = config.ca_path.clone().map(|ca_path| {
        let store = Arc::new(TrustAnchorStore::new(ca_path));
        let interval = Duration::from_secs(config.trust_anchor_refresh_secs);
        (store.clone().spawn_refresher(interval), store)
    });

    let server = match Server::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
