use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

use crate::error::{Error, Result};
use crate::shell::render_args;

/// The repository vigil validates. All `git` invocations go through here.
#[derive(Debug, Clone)]
pub(crate) struct GitRepo {
    dir: PathBuf,
}

impl GitRepo {
    pub(crate) fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory shared by every worktree of the repository (`.git` for a plain clone).
    pub(crate) fn common_dir(&self) -> Result<PathBuf> {
        let output = self.run(&["rev-parse", "--git-common-dir"])?;
        let dir = PathBuf::from(output.trim());
        if dir.is_absolute() {
            Ok(dir)
        } else {
            Ok(self.dir.join(dir))
        }
    }

    /// Run `git <args>` in the repository and return stdout. Non-zero exit is an error.
    pub(crate) fn run(&self, args: &[&str]) -> Result<String> {
        let owned: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        let rendered = render_args(&owned);
        debug!(dir = %self.dir.display(), "git {}", rendered);

        let output = Command::new("git")
            .args(args)
            .current_dir(&self.dir)
            .output()
            .map_err(|source| Error::GitSpawn {
                command: rendered.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(Error::Git {
                command: rendered,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}
