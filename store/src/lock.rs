//! Advisory catalog lock scoped to a store root.
//!
//! Mutations take the lock exclusively for their whole read-modify-write of
//! `index.json`; readers take it shared. The lock is an `flock`-style lock
//! on `<root>/.lock`, so it serializes across processes as well as tasks.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use a3s_artifact_core::error::{ArtifactError, Result};
use fs4::FileExt;
use tokio::time::Instant;

/// Name of the lock file inside the store root.
pub const LOCK_FILE: &str = ".lock";

/// How often a contended lock is retried.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Held catalog lock; released on drop.
#[derive(Debug)]
pub struct CatalogLock {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl CatalogLock {
    /// Acquire the lock for `root`, waiting at most `timeout`.
    pub async fn acquire(root: &Path, mode: LockMode, timeout: Duration) -> Result<Self> {
        let path = root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| ArtifactError::io(&path, e))?;

        let started = Instant::now();
        loop {
            let attempt = match mode {
                LockMode::Shared => FileExt::try_lock_shared(&file),
                LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
            };
            match attempt {
                Ok(()) => {
                    tracing::trace!(path = %path.display(), ?mode, "Catalog lock acquired");
                    return Ok(Self { file, path, mode });
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        return Err(ArtifactError::LockTimeout { path, waited });
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(e) => return Err(ArtifactError::io(&path, e)),
            }
        }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CatalogLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release catalog lock");
        }
    }
}
