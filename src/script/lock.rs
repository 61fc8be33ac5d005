//! Fingerprint-scoped build locks
//!
//! At most one process may build a given fingerprint at a time. The lock is an
//! exclusive advisory lock (`flock` on Unix) on `<root>/.locks/<fingerprint>.lock`,
//! released when the [`BuildLock`] is dropped or the holding process dies.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::fingerprint::Fingerprint;

/// Directory under the cache root holding lock files
pub const LOCK_DIR_NAME: &str = ".locks";

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const CONTENTION_WARNING_AFTER: Duration = Duration::from_millis(500);

/// Outcome of a failed acquisition
#[derive(Debug)]
pub enum LockFailure {
    Timeout(Duration),
    Io(io::Error),
}

/// Exclusive build lock for one fingerprint
#[derive(Debug)]
pub struct BuildLock {
    file: File,
    path: PathBuf,
}

impl BuildLock {
    pub fn path_for(cache_root: &Path, fingerprint: &Fingerprint) -> PathBuf {
        cache_root
            .join(LOCK_DIR_NAME)
            .join(format!("{}.lock", fingerprint))
    }

    /// Wait up to `timeout` for the lock.
    pub async fn acquire(
        cache_root: &Path,
        fingerprint: &Fingerprint,
        timeout: Duration,
    ) -> Result<Self, LockFailure> {
        let path = Self::path_for(cache_root, fingerprint);
        let start = Instant::now();
        let mut warned = false;

        loop {
            match Self::try_acquire_at(&path).map_err(LockFailure::Io)? {
                Some(lock) => {
                    if warned {
                        warn!(
                            fingerprint = %fingerprint.short(),
                            waited_ms = start.elapsed().as_millis() as u64,
                            "build lock acquired after contention"
                        );
                    }
                    return Ok(lock);
                }
                None => {
                    if !warned && start.elapsed() > CONTENTION_WARNING_AFTER {
                        warn!(
                            fingerprint = %fingerprint.short(),
                            "another process is building this script, waiting..."
                        );
                        warned = true;
                    }
                }
            }

            if start.elapsed() >= timeout {
                return Err(LockFailure::Timeout(timeout));
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Take the lock only if nobody holds it
    pub fn try_acquire(cache_root: &Path, fingerprint: &Fingerprint) -> io::Result<Option<Self>> {
        Self::try_acquire_at(&Self::path_for(cache_root, fingerprint))
    }

    fn try_acquire_at(path: &Path) -> io::Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(lock = %path.display(), "build lock acquired");
                Ok(Some(Self {
                    file,
                    path: path.to_path_buf(),
                }))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        // Lock files stay on disk; only the lock itself is released
        let _ = FileExt::unlock(&self.file);
    }
}
