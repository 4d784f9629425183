//! Cross-process exclusive lock on a sidecar file.
//!
//! The scheduler, CLI invocations and harness children all rewrite the same
//! task document, so every read-modify-write holds this lock.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::StoreError;

/// Held advisory lock. Released on drop.
#[derive(Debug)]
pub(crate) struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Block until the exclusive lock on `path` is held.
    ///
    /// Runs on the blocking pool since `flock` parks the thread.
    pub(crate) async fn acquire(path: &Path) -> Result<FileLock, StoreError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::acquire_blocking(path))
            .await
            .map_err(|e| StoreError::Unavailable(format!("lock task failed: {}", e)))?
    }

    fn acquire_blocking(path: PathBuf) -> Result<FileLock, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // The lock file is never removed: unlinking it while another process
        // waits on the old inode would let two holders in at once.
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        lock_exclusive(&file)?;
        trace!(path = %path.display(), "acquired store lock");
        Ok(FileLock { file, path })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        unlock(&self.file);
        trace!(path = %self.path.display(), "released store lock");
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    loop {
        // SAFETY: the fd belongs to `file`, which outlives this call.
        let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if ret == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the fd belongs to `file`, which is still open.
    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

// No advisory locking off unix; the in-process mutex is all there is.
#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> std::io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}
