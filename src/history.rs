use chrono::Utc;

use crate::commit::{parse_log_line, Commit, LogEntry, LOG_FORMAT, RECORD_SEPARATOR};
use crate::error::{Error, Result};
use crate::git::GitRepo;
use crate::status::StatusSet;
use crate::store::StatusStore;

/// Read access to the commit history plus the two repository-level actions
/// the control loop needs.
pub(crate) trait History {
    /// The `n` most recent commits, newest first. Never empty on success.
    fn list(&self, n: usize) -> Result<Vec<Commit>>;

    fn by_hash(&self, hash: &str) -> Result<Commit>;

    /// Whether HEAD differs from `trunk`.
    fn has_diff_against(&self, trunk: &str) -> Result<bool>;

    fn push_head(&self) -> Result<()>;

    fn latest(&self) -> Result<Commit> {
        self.list(1)?
            .into_iter()
            .next()
            .ok_or(Error::EmptyHistory)
    }
}

/// The latest commit, or the one named by `hash`.
pub(crate) fn commit_or_latest(history: &dyn History, hash: Option<&str>) -> Result<Commit> {
    match hash {
        Some(hash) => history.by_hash(hash),
        None => history.latest(),
    }
}

/// Recent commits paired with their persisted statuses, newest first.
pub(crate) fn recent_statuses(
    history: &dyn History,
    store: &dyn StatusStore,
    n: usize,
) -> Result<Vec<(Commit, StatusSet)>> {
    history
        .list(n)?
        .into_iter()
        .map(|commit| {
            let statuses = store.get(&commit.hash)?;
            Ok((commit, statuses))
        })
        .collect()
}

fn parse_log_output(output: &str) -> Result<Vec<LogEntry>> {
    let now = Utc::now();
    output
        .split(RECORD_SEPARATOR)
        .filter(|record| !record.trim().is_empty())
        .map(|record| parse_log_line(record, now))
        .collect()
}

impl GitRepo {
    /// Recent commits with their notes, read in a single `git log` call.
    pub(crate) fn log_entries(&self, n: usize) -> Result<Vec<LogEntry>> {
        let count = n.to_string();
        let format = format!("--pretty=format:{LOG_FORMAT}");
        let output = self.run(&["log", "-n", &count, &format])?;
        let entries = parse_log_output(&output)?;
        if entries.is_empty() {
            return Err(Error::EmptyHistory);
        }
        Ok(entries)
    }
}

impl History for GitRepo {
    fn list(&self, n: usize) -> Result<Vec<Commit>> {
        Ok(self
            .log_entries(n)?
            .into_iter()
            .map(|entry| entry.commit)
            .collect())
    }

    fn by_hash(&self, hash: &str) -> Result<Commit> {
        let format = format!("--pretty=format:{LOG_FORMAT}");
        let output = match self.run(&["log", "-1", &format, hash, "--"]) {
            Ok(output) => output,
            Err(Error::Git { .. }) => return Err(Error::UnknownCommit(hash.to_string())),
            Err(err) => return Err(err),
        };
        parse_log_output(&output)?
            .into_iter()
            .next()
            .map(|entry| entry.commit)
            .ok_or_else(|| Error::UnknownCommit(hash.to_string()))
    }

    fn has_diff_against(&self, trunk: &str) -> Result<bool> {
        let output = self.run(&["diff", "--name-only", trunk, "HEAD", "--"])?;
        Ok(!output.trim().is_empty())
    }

    fn push_head(&self) -> Result<()> {
        self.run(&["push"])?;
        Ok(())
    }
}
