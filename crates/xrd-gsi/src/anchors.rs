//! Shared trust-anchor store.
//!
//! CA certificates live in a directory of PEM files and are reloaded by a
//! background refresher. Handlers read an immutable snapshot that is swapped
//! atomically on refresh, so a reload never blocks an active request and a
//! failed reload leaves the previous snapshot in place until the next
//! interval.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::pem;

const CERT_HEADER: &str = "-----BEGIN CERTIFICATE-----";
const CERT_FOOTER: &str = "-----END CERTIFICATE-----";

/// One trusted certificate, DER decoded from its PEM file.
#[derive(Debug, Clone)]
pub struct TrustAnchor {
    pub name: String,
    pub der: Vec<u8>,
}

/// Snapshot-swapping store of trust anchors.
pub struct TrustAnchorStore {
    ca_path: PathBuf,
    snapshot: RwLock<Arc<Vec<TrustAnchor>>>,
}

impl TrustAnchorStore {
    /// Create an empty store rooted at `ca_path`. Call [`refresh`] or spawn
    /// the refresher to populate it.
    ///
    /// [`refresh`]: TrustAnchorStore::refresh
    pub fn new(ca_path: impl Into<PathBuf>) -> Self {
        Self {
            ca_path: ca_path.into(),
            snapshot: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// The current snapshot. Cheap; never blocks on a refresh in progress.
    pub fn snapshot(&self) -> Arc<Vec<TrustAnchor>> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Rescan the CA directory and publish a new snapshot. Files that fail
    /// to parse are skipped; a directory scan failure keeps the previous
    /// snapshot.
    pub fn refresh(&self) -> Result<usize> {
        let mut anchors = Vec::new();
        for entry in std::fs::read_dir(&self.ca_path)? {
            let entry = entry?;
            let path = entry.path();
            if !is_certificate_file(&path) {
                continue;
            }
            match load_anchor(&path) {
                Ok(anchor) => anchors.push(anchor),
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Skipping unreadable trust anchor");
                }
            }
        }
        anchors.sort_by(|a, b| a.name.cmp(&b.name));

        let count = anchors.len();
        *self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(anchors);
        debug!(count, ca_path = %self.ca_path.display(), "Trust anchors refreshed");
        Ok(count)
    }

    /// Load once, then keep refreshing every `interval` in the background.
    pub fn spawn_refresher(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        match self.refresh() {
            Ok(count) => info!(count, "Trust anchors loaded"),
            Err(e) => warn!(error = %e, "Initial trust anchor load failed"),
        }
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // the interval fires immediately once
            loop {
                ticker.tick().await;
                if let Err(e) = self.refresh() {
                    warn!(error = %e, "Trust anchor refresh failed, keeping previous snapshot");
                }
            }
        })
    }
}

fn is_certificate_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("pem") | Some("crt") | Some("0")
    )
}

fn load_anchor(path: &Path) -> Result<TrustAnchor> {
    let text = std::fs::read_to_string(path)?;
    let der = pem::from_pem(&text, CERT_HEADER, CERT_FOOTER)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(TrustAnchor { name, der })
}
