use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum Error {
    #[error("{0}")]
    Config(String),

    #[error("Unknown step {name:?}; configured steps: {available}")]
    UnknownStep { name: String, available: String },

    #[error("Failed to run git {command}: {source}")]
    GitSpawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("git {command} failed with exit code {code:?}: {stderr}")]
    Git {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("git log returned no commits")]
    EmptyHistory,

    #[error("No commit matches {0}")]
    UnknownCommit(String),

    #[error("Could not find {field} in log line {line:?}")]
    MalformedLogLine { field: &'static str, line: String },

    #[error("Could not parse commit time {0:?}")]
    InvalidTimestamp(String),

    #[error("Statuses for {hash} changed concurrently {attempts} times in a row; giving up")]
    StatusConflict { hash: String, attempts: usize },

    #[error("Timed out waiting for lock {}", path.display())]
    LockTimeout { path: PathBuf },

    #[error("{context} {}: {source}", path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }
}

pub(crate) type Result<T> = std::result::Result<T, Error>;
