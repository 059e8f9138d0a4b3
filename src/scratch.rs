//! Scratch copies of the live graph file
//!
//! The node keeps its graph file open for writing. Reading a private copy means
//! the sync never waits on, or holds, the node's file lock.

use crate::{SyncError, SyncResult};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// A byte-for-byte copy of the source file, removed when dropped
#[derive(Debug)]
pub struct ScratchCopy {
    path: PathBuf,
    bytes: u64,
}

impl ScratchCopy {
    /// Copy `source` to `scratch`, creating or truncating the destination
    pub async fn create(source: &Path, scratch: &Path) -> SyncResult<Self> {
        if let Some(parent) = scratch.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    SyncError::Snapshot(format!(
                        "failed to create scratch directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let mut src = tokio::fs::File::open(source).await.map_err(|e| {
            SyncError::Snapshot(format!("failed to open source {}: {}", source.display(), e))
        })?;

        let mut dst = tokio::fs::File::create(scratch).await.map_err(|e| {
            SyncError::Snapshot(format!(
                "failed to create scratch file {}: {}",
                scratch.display(),
                e
            ))
        })?;

        // From here on the guard owns the file, so a failed copy still cleans up.
        let mut copy = Self {
            path: scratch.to_path_buf(),
            bytes: 0,
        };

        copy.bytes = tokio::io::copy(&mut src, &mut dst).await.map_err(|e| {
            SyncError::Snapshot(format!(
                "failed to copy {} to {}: {}",
                source.display(),
                scratch.display(),
                e
            ))
        })?;

        dst.flush().await.map_err(|e| {
            SyncError::Snapshot(format!("failed to flush {}: {}", scratch.display(), e))
        })?;

        info!(
            "Copied {} to {} ({} bytes)",
            source.display(),
            scratch.display(),
            copy.bytes
        );

        Ok(copy)
    }

    /// Location of the copy
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of bytes copied
    pub fn len(&self) -> u64 {
        self.bytes
    }

    /// Whether the source file was empty
    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }
}

impl Drop for ScratchCopy {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed scratch copy {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove scratch copy {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}
