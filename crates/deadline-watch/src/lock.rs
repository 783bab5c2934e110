//! Process-level run lock
//!
//! Only one `deadline-watch` invocation may mutate the state and calendar
//! files at a time. The lock is an OS advisory lock on a dedicated file, so
//! it is released by the kernel when the holder exits or dies. The file
//! itself is left in place.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use tracing::{debug, warn};

/// How long to wait for a busy lock before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Held lock; released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Acquire the lock at `path`, polling for up to `timeout`. Returns
    /// `None` when another holder kept it for the whole timeout.
    pub async fn acquire(path: impl Into<PathBuf>, timeout: Duration) -> io::Result<Option<Self>> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;

        let give_up_at = tokio::time::Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(lock = %path.display(), "Acquired run lock");
                    return Ok(Some(Self { file, path }));
                }
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    if tokio::time::Instant::now() >= give_up_at {
                        return Ok(None);
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(lock = %self.path.display(), error = %e, "Failed to release run lock");
        }
    }
}
