//! Exclusive lock file guarding status writes across vigil processes.

use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// A lock older than this was left behind by a process that died holding it.
const STALE_AFTER: Duration = Duration::from_secs(60);

/// Held while the lock file exists; removed on drop.
#[derive(Debug)]
pub(crate) struct FileLock {
    path: PathBuf,
}

impl FileLock {
    pub(crate) fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        let start = Instant::now();
        loop {
            match Self::try_acquire(path) {
                Ok(Some(lock)) => return Ok(lock),
                Ok(None) if start.elapsed() < timeout => thread::sleep(POLL_INTERVAL),
                Ok(None) => {
                    return Err(Error::LockTimeout {
                        path: path.to_path_buf(),
                    })
                }
                Err(err) => return Err(Error::io("Failed to create lock", path, err)),
            }
        }
    }

    fn try_acquire(path: &Path) -> io::Result<Option<Self>> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                writeln!(file, "pid={}", std::process::id())?;
                writeln!(file, "timestamp={}", Utc::now().to_rfc3339())?;
                Ok(Some(Self {
                    path: path.to_path_buf(),
                }))
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                if is_stale(path) {
                    warn!(path = %path.display(), "removing stale lock");
                    // Another waiter may remove it first.
                    let _ = fs::remove_file(path);
                }
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

fn is_stale(path: &Path) -> bool {
    let Ok(modified) = fs::metadata(path).and_then(|meta| meta.modified()) else {
        return false;
    };
    SystemTime::now()
        .duration_since(modified)
        .map(|age| age > STALE_AFTER)
        .unwrap_or(false)
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %err, "lock already gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_holder_times_out_until_first_drops() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("notes.lock");

        let held = FileLock::acquire(&path, Duration::from_secs(1)).expect("first acquire");
        assert!(path.is_file());
        let err = FileLock::acquire(&path, Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, Error::LockTimeout { .. }), "got {err}");

        drop(held);
        assert!(!path.exists());
        FileLock::acquire(&path, Duration::from_millis(50)).expect("free again");
    }

    #[test]
    fn missing_parent_is_an_io_error() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("missing").join("notes.lock");
        let err = FileLock::acquire(&path, Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, Error::Io { .. }), "got {err}");
    }
}
