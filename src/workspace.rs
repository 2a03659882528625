use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::git::GitRepo;

/// Materializes an isolated checkout of a commit for steps to run in.
pub(crate) trait Provisioner {
    /// Reuse `path` if it exists, otherwise check `hash` out there.
    fn init(&self, path: &Path, hash: &str) -> Result<PathBuf>;
}

/// Workspace directory for a commit. Stable across runs so later steps reuse it.
pub(crate) fn workspace_path(root: &Path, hash: &str) -> PathBuf {
    root.join(format!("vigil-{hash}"))
}

impl Provisioner for GitRepo {
    fn init(&self, path: &Path, hash: &str) -> Result<PathBuf> {
        if path.exists() {
            debug!(path = %path.display(), hash, "reusing workspace");
            return Ok(path.to_path_buf());
        }

        let target = path.to_string_lossy().to_string();
        let args = ["worktree", "add", "--detach", target.as_str(), hash];
        match self.run(&args) {
            Ok(_) => {}
            // The OS may have cleaned the temp dir while git still tracks the worktree.
            Err(Error::Git { stderr, .. }) if stderr.contains("already registered") => {
                info!(path = %path.display(), "pruning stale worktree registration");
                self.run(&["worktree", "prune"])?;
                self.run(&args)?;
            }
            Err(err) => return Err(err),
        }
        info!(path = %path.display(), hash, "created workspace");
        Ok(path.to_path_buf())
    }
}
