//! Per-connection open-file table.
//!
//! Descriptors are small indices into a slot vector: `add` fills the first
//! vacated slot before growing, so descriptors stay compact enough to embed
//! in a 32-bit xrootd file handle. A descriptor is never reissued without an
//! intervening close of its slot.

use std::path::PathBuf;

use tokio::fs::File;
use tracing::debug;
use xrd_proto::{ErrorCode, XrootdError};

/// An open file owned by the connection, with the resolved path kept for
/// logging and status reporting.
#[derive(Debug)]
pub struct OpenFile {
    pub file: File,
    pub path: PathBuf,
}

/// Slot table mapping descriptors to open files.
#[derive(Debug, Default)]
pub struct FileTable {
    slots: Vec<Option<OpenFile>>,
}

impl FileTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `file` in the first free slot, growing the table if none is
    /// vacant. Returns the descriptor.
    pub fn add(&mut self, file: OpenFile) -> u32 {
        for (fd, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(file);
                return fd as u32;
            }
        }
        self.slots.push(Some(file));
        (self.slots.len() - 1) as u32
    }

    pub fn get(&self, fd: u32) -> Result<&OpenFile, XrootdError> {
        self.slots
            .get(fd as usize)
            .and_then(|slot| slot.as_ref())
            .ok_or_else(invalid_descriptor)
    }

    pub fn get_mut(&mut self, fd: u32) -> Result<&mut OpenFile, XrootdError> {
        self.slots
            .get_mut(fd as usize)
            .and_then(|slot| slot.as_mut())
            .ok_or_else(invalid_descriptor)
    }

    /// Vacate the slot, handing ownership of the file back to the caller.
    pub fn remove(&mut self, fd: u32) -> Result<OpenFile, XrootdError> {
        self.slots
            .get_mut(fd as usize)
            .and_then(|slot| slot.take())
            .ok_or_else(invalid_descriptor)
    }

    /// Number of currently open descriptors.
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Total slots ever allocated; every live descriptor is below this.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

fn invalid_descriptor() -> XrootdError {
    XrootdError::new(ErrorCode::FileNotOpen, "Invalid file descriptor")
}

impl Drop for FileTable {
    fn drop(&mut self) {
        let open = self.open_count();
        if open > 0 {
            debug!(open, "Releasing open files on connection teardown");
        }
    }
}
