use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::git::GitRepo;
use crate::lock::FileLock;
use crate::status::StatusSet;

/// Optimistic writes give up after this many consecutive lost races.
pub(crate) const MAX_WRITE_ATTEMPTS: usize = 5;

const NOTES_LOCK_FILE: &str = "vigil-notes.lock";
const NOTES_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-commit status persistence.
///
/// `update` is a plain overwrite: the last writer wins. `modify` layers a
/// bounded compare-and-swap on top using the set's `revision` counter, so a
/// concurrent writer is detected and the change is re-applied to fresh data.
pub(crate) trait StatusStore {
    /// Missing or unreadable metadata reads as an empty set.
    fn get(&self, hash: &str) -> Result<StatusSet>;

    fn update(&self, hash: &str, statuses: &StatusSet) -> Result<()>;

    /// Write `statuses` only if the stored revision is still `expected`.
    /// Checking and writing must be atomic with respect to other callers.
    /// Returns `false`, writing nothing, when another writer got there first.
    fn compare_and_update(&self, hash: &str, expected: u64, statuses: &StatusSet) -> Result<bool>;

    fn modify(&self, hash: &str, change: &mut dyn FnMut(&mut StatusSet)) -> Result<StatusSet> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = self.get(hash)?;
            let mut next = current.clone();
            change(&mut next);
            next.revision = current.revision + 1;

            if self.compare_and_update(hash, current.revision, &next)? {
                return Ok(next);
            }
            warn!(
                hash,
                attempt,
                expected = current.revision,
                "statuses changed underneath us, retrying"
            );
        }
        Err(Error::StatusConflict {
            hash: hash.to_string(),
            attempts: MAX_WRITE_ATTEMPTS,
        })
    }

    /// Drop the named steps' entries, keeping every other step's history.
    fn clear(&self, hash: &str, names: &[&str]) -> Result<StatusSet> {
        debug!(hash, steps = ?names, "clearing statuses");
        self.modify(hash, &mut |statuses: &mut StatusSet| {
            for name in names {
                statuses.remove(name);
            }
        })
    }
}

impl StatusStore for GitRepo {
    fn get(&self, hash: &str) -> Result<StatusSet> {
        let notes = self.run(&["log", "-1", "--format=%N", hash, "--"])?;
        Ok(StatusSet::parse_lenient(&notes))
    }

    fn update(&self, hash: &str, statuses: &StatusSet) -> Result<()> {
        let notes = statuses.to_json()?;
        debug!(hash, steps = ?statuses.names(), revision = statuses.revision, "writing statuses");
        self.run(&["notes", "add", "-f", "-m", &notes, hash])?;
        Ok(())
    }

    fn compare_and_update(&self, hash: &str, expected: u64, statuses: &StatusSet) -> Result<bool> {
        // Shared by every vigil process on this repository, worktrees included.
        let lock_path = self.common_dir()?.join(NOTES_LOCK_FILE);
        let _lock = FileLock::acquire(&lock_path, NOTES_LOCK_TIMEOUT)?;
        let observed = self.get(hash)?.revision;
        if observed != expected {
            debug!(hash, expected, observed, "revision moved, not writing");
            return Ok(false);
        }
        self.update(hash, statuses)?;
        Ok(true)
    }
}
