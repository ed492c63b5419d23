//! Cooperative, per-folder exclusion (C1).
//!
//! A sentinel `.lock` file is created inside every locked folder and held
//! with an advisory OS file lock (`fd-lock`, wrapping POSIX `flock` /
//! Windows `LockFileEx`), so a hard-killed holder never leaves a folder
//! permanently locked. Folders are always locked in stable lexicographic
//! order so two callers requesting overlapping sets cannot deadlock.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fd_lock::RwLock as FileRwLock;
use thiserror::Error;

use crate::define::LOCK_FILE;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("lock could not be acquired, timeout exceeded")]
    Timeout,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Holds an advisory lock on one or more folders for the lifetime of the
/// value. Release happens in `Drop`, so it runs on every exit path of the
/// scope including panics unwinding through it.
pub struct FolderLock {
    // Order matches acquisition order (stable lexicographic on folder path).
    // Each guard keeps its file handle and the OS lock alive.
    _guards: Vec<FileRwLock<File>>,
}

impl FolderLock {
    /// Acquire a lock on a single folder.
    pub fn acquire(folder: impl AsRef<Path>, timeout: f64) -> Result<Self, LockError> {
        Self::acquire_many(std::slice::from_ref(&folder.as_ref().to_path_buf()), timeout)
    }

    /// Acquire a lock on every folder in `folders`, in stable lexicographic
    /// order.
    ///
    /// `timeout < 0` blocks indefinitely; `timeout == 0` fails fast with
    /// [`LockError::Timeout`] on first contention; `timeout > 0` waits at
    /// most that many seconds per lock.
    pub fn acquire_many(folders: &[PathBuf], timeout: f64) -> Result<Self, LockError> {
        let mut sorted: Vec<PathBuf> = folders.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for folder in &sorted {
            std::fs::create_dir_all(folder)?;
            let lock_path = folder.join(LOCK_FILE);
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&lock_path)?;
            let mut rw = FileRwLock::new(file);
            acquire_with_timeout(&mut rw, timeout)?;
            guards.push(rw);
        }

        Ok(FolderLock { _guards: guards })
    }
}

// The guard borrows `rw` mutably, which doesn't fit in `FolderLock`'s flat
// `Vec<FileRwLock<File>>` alongside the lock itself. We forget it instead:
// the underlying OS lock (flock / LockFileEx) is released when the file
// descriptor closes, which happens when `FileRwLock<File>` is dropped.
fn acquire_with_timeout(rw: &mut FileRwLock<File>, timeout: f64) -> Result<(), LockError> {
    if timeout == 0.0 {
        return match rw.try_write() {
            Ok(guard) => {
                std::mem::forget(guard);
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Err(LockError::Timeout),
            Err(err) => Err(LockError::Io(err)),
        };
    }

    if timeout < 0.0 {
        // Block indefinitely by polling; fd-lock has no blocking primitive
        // that doesn't also support a deadline, so we poll at a short
        // interval forever.
        loop {
            match rw.try_write() {
                Ok(guard) => {
                    std::mem::forget(guard);
                    return Ok(());
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(err) => return Err(LockError::Io(err)),
            }
        }
    }

    let deadline = Instant::now() + Duration::from_secs_f64(timeout);
    loop {
        match rw.try_write() {
            Ok(guard) => {
                std::mem::forget(guard);
                return Ok(());
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(LockError::Timeout);
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(err) => return Err(LockError::Io(err)),
        }
    }
}
