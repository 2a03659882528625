use chrono::{Local, Utc};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::commit::Commit;
use crate::config::{LoadedConfig, StepSpec};
use crate::error::{Error, Result};
use crate::history::History;
use crate::shell::{ensure_parent_dir, run_logged, CommandEnv, LoggedCommand};
use crate::status::{ExecutionState, Span, StatusSet, StepResult};
use crate::store::StatusStore;
use crate::workspace::{workspace_path, Provisioner};

/// Where a step runs and where its output goes.
#[derive(Debug, Clone)]
pub(crate) struct RunContext {
    pub(crate) log_dir: PathBuf,
    pub(crate) workspace_root: PathBuf,
    pub(crate) repo_dir: PathBuf,
    pub(crate) quiet: bool,
    pub(crate) timeout: Option<Duration>,
}

impl RunContext {
    pub(crate) fn from_config(loaded: &LoadedConfig, quiet: bool) -> Self {
        Self {
            log_dir: loaded.log_dir(),
            workspace_root: loaded.workspace_root(),
            repo_dir: loaded.repo_dir(),
            quiet,
            timeout: loaded.step_timeout(),
        }
    }
}

/// The three collaborators the control loop works against.
#[derive(Clone, Copy)]
pub(crate) struct Services<'a> {
    pub(crate) history: &'a dyn History,
    pub(crate) store: &'a dyn StatusStore,
    pub(crate) provisioner: &'a dyn Provisioner,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RunResult {
    pub(crate) step: String,
    pub(crate) state: ExecutionState,
    pub(crate) log: PathBuf,
    pub(crate) timed_out: bool,
}

impl RunResult {
    pub(crate) fn failed(&self) -> bool {
        self.state == ExecutionState::Failure
    }
}

fn sanitize_file_component(raw: &str) -> String {
    raw.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-') {
                ch
            } else {
                '-'
            }
        })
        .collect()
}

/// `<log_dir>/<yymmddHHMMSS>-<hash>-<step>.log`
pub(crate) fn log_file_path(log_dir: &Path, commit: &Commit, step_name: &str) -> PathBuf {
    let stamp = Local::now().format("%y%m%d%H%M%S");
    log_dir.join(format!(
        "{}-{}-{}.log",
        stamp,
        sanitize_file_component(&commit.hash),
        sanitize_file_component(step_name)
    ))
}

fn append_to_log(path: &Path, message: &str) {
    let written = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| writeln!(file, "{message}"));
    if let Err(err) = written {
        warn!(log = %path.display(), error = %err, "could not write to step log");
    }
}

/// Execute one step against `commit`, persisting `InProgress` before and the
/// final state after. A failing command is a `Failure` result, not an error;
/// only status store failures propagate.
pub(crate) fn run_step(
    step: &StepSpec,
    commit: &Commit,
    services: Services<'_>,
    ctx: &RunContext,
) -> Result<RunResult> {
    let log = log_file_path(&ctx.log_dir, commit, &step.name);
    ensure_parent_dir(&log).map_err(|err| Error::io("Failed to create log dir", &log, err))?;

    let start = Utc::now();
    let in_progress = StepResult::new(
        &step.name,
        &step.cmd,
        ExecutionState::InProgress,
        Span::open(start),
        Some(log.clone()),
    );
    services.store.modify(&commit.hash, &mut |statuses: &mut StatusSet| {
        statuses.replace(in_progress.clone())
    })?;
    info!(hash = %commit.hash, step = %step.name, log = %log.display(), "running step");

    let path = workspace_path(&ctx.workspace_root, &commit.hash);
    let (state, timed_out) = match services.provisioner.init(&path, &commit.hash) {
        Ok(workspace) => {
            let env = CommandEnv {
                cwd: Some(workspace),
                repo_dir: Some(ctx.repo_dir.clone()),
                commit: Some(commit.hash.clone()),
                step: Some(step.name.clone()),
            };
            let request = LoggedCommand {
                command: &step.cmd,
                env: &env,
                log_file: &log,
                stream: !ctx.quiet,
                timeout: ctx.timeout,
            };
            match run_logged(&request) {
                Ok(outcome) if outcome.timed_out => (ExecutionState::Failure, true),
                Ok(outcome) => (ExecutionState::from_exit_code(outcome.exit_code), false),
                Err(err) => {
                    error!(step = %step.name, error = %err, "failed to start step");
                    append_to_log(&log, &format!("Failed to start {}: {}", step.cmd, err));
                    (ExecutionState::Failure, false)
                }
            }
        }
        Err(err) => {
            error!(hash = %commit.hash, step = %step.name, error = %err, "failed to provision workspace");
            append_to_log(
                &log,
                &format!("Failed to provision workspace {}: {}", path.display(), err),
            );
            (ExecutionState::Failure, false)
        }
    };

    let finished = StepResult::new(
        &step.name,
        &step.cmd,
        state,
        Span::closed(start, Utc::now()),
        Some(log.clone()),
    );
    services.store.modify(&commit.hash, &mut |statuses: &mut StatusSet| {
        statuses.replace(finished.clone())
    })?;

    match state {
        ExecutionState::Success => info!(hash = %commit.hash, step = %step.name, "step succeeded"),
        _ => warn!(
            hash = %commit.hash,
            step = %step.name,
            log = %log.display(),
            timed_out,
            "step failed"
        ),
    }

    Ok(RunResult {
        step: step.name.clone(),
        state,
        log,
        timed_out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn log_file_names_are_filesystem_safe() {
        let commit = Commit {
            hash: "aa85f0e".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            author: "Jane".to_string(),
        };
        let path = log_file_path(Path::new("/logs"), &commit, "unit tests/fast");
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("-aa85f0e-unit-tests-fast.log"), "got {name}");
        assert_eq!(name.len(), "240601120000".len() + "-aa85f0e-unit-tests-fast.log".len());
        assert_eq!(path.parent(), Some(Path::new("/logs")));
    }
}
