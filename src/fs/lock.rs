// src/fs/lock.rs

//! Advisory file locks serialising document updates across processes.
//!
//! Two `jobflow` invocations over the same workspace each hold their own
//! in-process job mutex, so the read-check-write of a run record also takes
//! an exclusive `flock` on a lock file inside the job directory.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};

/// How long to wait for another process to release a job lock.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Held lock; released when dropped.
#[derive(Debug)]
pub struct FileLock {
    held: Option<(PathBuf, File)>,
}

impl FileLock {
    /// A guard that locks nothing, for stores without cross-process access.
    pub fn unlocked() -> Self {
        Self { held: None }
    }

    /// Take an exclusive lock on `path`, creating the file if needed.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        let start = Instant::now();
        let mut warned = false;

        loop {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)
                .with_context(|| format!("opening lock file {:?}", path))?;

            match try_lock_exclusive(&file) {
                Ok(()) => {
                    if warned {
                        debug!(path = %path.display(), waited = ?start.elapsed(), "lock acquired after contention");
                    }
                    return Ok(Self {
                        held: Some((path.to_path_buf(), file)),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !warned && start.elapsed() > Duration::from_millis(500) {
                        warn!(path = %path.display(), "job is locked by another process; waiting");
                        warned = true;
                    }
                }
                Err(e) => return Err(e).with_context(|| format!("locking {:?}", path)),
            }

            if start.elapsed() >= timeout {
                bail!("timed out after {timeout:?} waiting for lock {:?}", path);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.held.as_ref().map(|(path, _)| path.as_path())
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Some((_, file)) = &self.held {
            unlock(file);
        }
    }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor stays open for the lifetime of `file`.
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
    } else {
        Err(err)
    }
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;

    // SAFETY: as above; closing the file would release the lock as well.
    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

#[cfg(not(unix))]
fn try_lock_exclusive(file: &File) -> io::Result<()> {
    file.try_lock().map_err(|e| match e {
        std::fs::TryLockError::WouldBlock => io::Error::new(io::ErrorKind::WouldBlock, "lock held"),
        std::fs::TryLockError::Error(err) => err,
    })
}

#[cfg(not(unix))]
fn unlock(file: &File) {
    let _ = file.unlock();
}
