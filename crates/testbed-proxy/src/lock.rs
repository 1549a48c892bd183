//! Cross-process lock guarding the shared container's cold start.
//!
//! Uses an advisory `flock` on the same file the shell scripts lock, so Rust
//! callers and script invocations exclude each other.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::{Duration, Instant};

use fs2::FileExt;
use testbed_common::error::{Result, TestbedError};

/// Interval between lock attempts while waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// An exclusive lock held until dropped.
#[derive(Debug)]
pub struct ColdStartLock {
    file: File,
}

impl ColdStartLock {
    /// Blocks until the lock is held.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the lock file cannot be opened or locked.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = open(path)?;
        file.lock_exclusive().map_err(|e| TestbedError::io(path, e))?;
        Ok(Self { file })
    }

    /// Takes the lock if it is free.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the lock file cannot be opened.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let file = open(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file })),
            Err(_) => Ok(None),
        }
    }

    /// Waits up to `wait` for the lock. Returns `None` when the wait runs
    /// out, so that a crashed holder cannot block callers forever.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the lock file cannot be opened.
    pub fn acquire_timeout(path: &Path, wait: Duration) -> Result<Option<Self>> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(lock) = Self::try_acquire(path)? {
                return Ok(Some(lock));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Drop for ColdStartLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn open(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| TestbedError::io(parent, e))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| TestbedError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locks/shared.lock");
        let _lock = ColdStartLock::acquire(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn try_acquire_returns_none_when_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.lock");
        let _lock = ColdStartLock::acquire(&path).unwrap();
        assert!(ColdStartLock::try_acquire(&path).unwrap().is_none());
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.lock");
        drop(ColdStartLock::acquire(&path).unwrap());
        assert!(ColdStartLock::try_acquire(&path).unwrap().is_some());
    }

    #[test]
    fn wait_runs_out_on_held_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.lock");
        let _held = ColdStartLock::acquire(&path).unwrap();
        let start = Instant::now();
        let lock = ColdStartLock::acquire_timeout(&path, Duration::from_millis(250)).unwrap();
        assert!(lock.is_none());
        assert!(start.elapsed() >= Duration::from_millis(250));
    }
}
