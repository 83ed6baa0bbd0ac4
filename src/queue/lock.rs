// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Advisory cross-process lock on the queue store.
//!
//! Inside the process the queue serializes its own writers. This lock only
//! keeps external maintenance tooling from writing to the same SQLite file
//! while the device owns it: whoever holds `<db>.lock` is the single writer.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

use super::QueueError;

/// Exclusive advisory lock, released on drop.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Lock file path for a database path.
    pub fn lock_path(db_path: &Path) -> PathBuf {
        let mut name = db_path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Take the lock without blocking.
    pub fn acquire(db_path: &Path) -> Result<Self, QueueError> {
        let path = Self::lock_path(db_path);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| QueueError::Backend(format!("cannot open lock file {}: {e}", path.display())))?;

        file.try_lock_exclusive().map_err(|_| QueueError::Locked {
            path: path.display().to_string(),
        })?;

        debug!(path = %path.display(), "Queue store lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "Failed to release queue store lock");
        }
    }
}
