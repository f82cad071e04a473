//! Exclusive repository locking.
//!
//! A POSIX advisory lock on a dedicated file enforces the
//! single-writer discipline. Waiters poll every 100 ms and observe a
//! cancellation flag; the lock file content (pid and acquisition
//! time) is diagnostics only, never authoritative.

use crate::StorageError;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How often a lock waiter re-checks the lock and the cancel flag.
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared cancellation flag for lock waits.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// A fresh, unraised flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag; current and future waits fail with
    /// [`StorageError::LockCancelled`].
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// True once raised.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Diagnostics written into a held lock file.
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    acquired_at: String,
}

/// A held exclusive lock. Released on drop.
#[derive(Debug)]
pub struct StorageLock {
    file: File,
    path: PathBuf,
}

impl StorageLock {
    /// Acquire the lock at `path`, polling until it is free or
    /// `cancel` is raised.
    pub fn acquire(path: &Path, cancel: &CancelFlag) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::io(format!("create {}", parent.display()), e))?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| StorageError::io(format!("open lock {}", path.display()), e))?;
        loop {
            if cancel.is_cancelled() {
                return Err(StorageError::LockCancelled);
            }
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(e) => {
                    return Err(StorageError::io(format!("lock {}", path.display()), e));
                }
            }
        }
        debug!(lock = %path.display(), "acquired exclusive lock");

        let info = LockInfo {
            pid: std::process::id(),
            acquired_at: chrono::Utc::now().to_rfc3339(),
        };
        // Diagnostics only; failure to write them does not fail the
        // acquisition.
        let _ = file.set_len(0);
        if let Ok(bytes) = serde_json::to_vec(&info) {
            let _ = file.write_all(&bytes);
        }
        let _ = file.flush();

        Ok(Self { file, path: path.to_path_buf() })
    }

    /// The lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StorageLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        debug!(lock = %self.path.display(), "released exclusive lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_is_exclusive_and_reacquirable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repository.lock");
        let cancel = CancelFlag::new();

        let held = StorageLock::acquire(&path, &cancel).unwrap();

        // A concurrent waiter gives up once its flag is raised.
        let contender_cancel = CancelFlag::new();
        let contender_path = path.clone();
        let waiter = std::thread::spawn({
            let contender_cancel = contender_cancel.clone();
            move || StorageLock::acquire(&contender_path, &contender_cancel)
        });
        std::thread::sleep(Duration::from_millis(250));
        contender_cancel.cancel();
        let err = waiter.join().unwrap().unwrap_err();
        assert!(matches!(err, StorageError::LockCancelled));

        drop(held);
        let reacquired = StorageLock::acquire(&path, &cancel).unwrap();
        drop(reacquired);
    }

    #[test]
    fn cancelled_flag_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = StorageLock::acquire(&dir.path().join("x.lock"), &cancel).unwrap_err();
        assert!(matches!(err, StorageError::LockCancelled));
    }

    #[test]
    fn lock_file_carries_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repository.lock");
        let held = StorageLock::acquire(&path, &CancelFlag::new()).unwrap();
        let content = std::fs::read_to_string(held.path()).unwrap();
        assert!(content.contains(&std::process::id().to_string()));
        drop(held);
    }
}
