use chrono::Utc;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{ConfigSource, LoadedConfig};
use crate::error::{Error, Result};
use crate::git::GitRepo;
use crate::history::recent_statuses;
use crate::logger::sanitize_log_value;
use crate::shell::{run_interactive, CommandEnv};
use crate::staleness::is_stale;
use crate::status::{ExecutionState, Span, StatusSet, StepResult, PUSH_STEP};
use crate::step_runner::{run_step, RunContext, Services};

const INTERRUPT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub(crate) struct Quit {
    pub(crate) code: i32,
    #[allow(dead_code)]
    pub(crate) reason: String,
}

impl Quit {
    pub(crate) fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code as u8)
    }
}

pub(crate) fn quit(reason: &str, code: i32) -> Quit {
    let sanitized = if reason.trim().is_empty() {
        "unknown".to_string()
    } else {
        sanitize_log_value(reason)
    };
    debug!(code, "quit reason={}", sanitized);
    Quit {
        code,
        reason: reason.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CycleOutcome {
    /// At least one step executed.
    Ran,
    /// Nothing to do for the head commit.
    Idle,
    /// The head commit has a recorded failure and fail-fast holds further work back.
    Blocked { hash: String, failures: Vec<StepResult> },
}

fn report_failures(hash: &str, failures: &[StepResult]) {
    warn!(hash, "latest commit failed");
    for failure in failures {
        let log = failure
            .log
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "none".to_string());
        warn!(step = %failure.name(), log = %log, "step failed");
    }
}

/// One pass of the control loop against the head commit.
///
/// Step results persist as each step finishes. The post-run checks re-read
/// history and statuses so they see what the steps wrote.
pub(crate) fn run_cycle(
    loaded: &LoadedConfig,
    services: Services<'_>,
    ctx: &RunContext,
) -> Result<CycleOutcome> {
    let config = &loaded.config;
    let latest = services.history.latest()?;
    let statuses = services.store.get(&latest.hash)?;

    if config.fail_fast && statuses.has_failed() {
        return Ok(CycleOutcome::Blocked {
            hash: latest.hash,
            failures: statuses.failures().into_iter().cloned().collect(),
        });
    }

    if config.skip_if_no_diff_against_trunk
        && !services.history.has_diff_against(&config.trunk)?
    {
        debug!(hash = %latest.hash, trunk = %config.trunk, "no changes compared to trunk, waiting");
        return Ok(CycleOutcome::Idle);
    }

    let mut window: Option<Vec<_>> = None;
    let mut ran = false;
    for step in &config.steps {
        match statuses.state(&step.name) {
            ExecutionState::Success | ExecutionState::Failure => {
                debug!(step = %step.name, "already has a result for this commit");
                continue;
            }
            ExecutionState::InProgress => {
                info!(step = %step.name, "step was interrupted while running, executing again")
            }
            ExecutionState::Unknown => debug!(step = %step.name, "step has not run yet"),
        }

        if window.is_none() {
            window = Some(recent_statuses(
                services.history,
                services.store,
                config.history_window,
            )?);
        }
        let history = window.as_deref().unwrap_or_default();
        if !is_stale(history, step.max_staleness_seconds, &step.name, Utc::now()) {
            debug!(
                step = %step.name,
                max_staleness_seconds = step.max_staleness_seconds,
                "recent success within staleness budget, skipping"
            );
            continue;
        }

        let result = run_step(step, &latest, services, ctx)?;
        ran = true;
        if config.fail_fast && result.failed() {
            info!(step = %step.name, "fail fast enabled, skipping remaining steps");
            break;
        }
    }

    let head = services.history.latest()?;
    let fresh = services.store.get(&head.hash)?;
    if fresh.all_succeeded(loaded.step_names()) {
        let pushed = config.push_on_success && !fresh.is_pushed() && push(services, &head.hash)?;
        if ran || pushed {
            if let Some(command) = &config.command_on_success {
                run_success_command(command, &head.hash, ctx);
            }
        }
    }

    Ok(if ran {
        CycleOutcome::Ran
    } else {
        CycleOutcome::Idle
    })
}

/// Push HEAD and record the synthetic `Push` step. A failed push is logged
/// and left unrecorded so the next successful cycle retries it.
fn push(services: Services<'_>, hash: &str) -> Result<bool> {
    info!(hash, "all steps succeeded, pushing");
    if let Err(err) = services.history.push_head() {
        error!(hash, error = %err, "push failed");
        return Ok(false);
    }
    let now = Utc::now();
    let marker = StepResult::new(
        PUSH_STEP,
        "git push",
        ExecutionState::Success,
        Span::instant(now),
        None,
    );
    services
        .store
        .modify(hash, &mut |statuses: &mut StatusSet| statuses.replace(marker.clone()))?;
    Ok(true)
}

fn run_success_command(command: &str, hash: &str, ctx: &RunContext) {
    let env = CommandEnv {
        cwd: Some(ctx.repo_dir.clone()),
        repo_dir: Some(ctx.repo_dir.clone()),
        commit: Some(hash.to_string()),
        step: None,
    };
    info!(hash, command = %sanitize_log_value(command), "running command_on_success");
    match run_interactive(command, &env) {
        Ok(0) => {}
        Ok(code) => warn!(hash, code, "command_on_success exited with non-zero code"),
        Err(err) => error!(hash, error = %err, "failed to run command_on_success"),
    }
}

fn check_interrupted(interrupt: &AtomicBool) -> std::result::Result<(), Quit> {
    if interrupt.load(Ordering::SeqCst) {
        return Err(quit("interrupted", 130));
    }
    Ok(())
}

fn idle_sleep(interval: Duration, interrupt: &AtomicBool) -> std::result::Result<(), Quit> {
    let deadline = Instant::now() + interval;
    loop {
        check_interrupted(interrupt)?;
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        thread::sleep(INTERRUPT_POLL.min(deadline - now));
    }
}

/// Poll the repository until interrupted, reloading the configuration before every cycle.
pub(crate) fn watch(
    source: &ConfigSource,
    quiet: bool,
    interrupt: &AtomicBool,
) -> std::result::Result<(), Quit> {
    info!(config = %source.path().display(), "watching for new commits");
    let mut blocked_on: Option<String> = None;
    loop {
        check_interrupted(interrupt)?;
        let loaded = source.load().map_err(|err| {
            error!(error = %err, "failed to reload config");
            quit(&format!("config:{err}"), 1)
        })?;
        let repo = GitRepo::new(loaded.repo_dir());
        let services = Services {
            history: &repo,
            store: &repo,
            provisioner: &repo,
        };
        let ctx = RunContext::from_config(&loaded, quiet);

        match run_cycle(&loaded, services, &ctx) {
            Ok(CycleOutcome::Ran) => {
                blocked_on = None;
            }
            Ok(CycleOutcome::Idle) => {
                blocked_on = None;
                idle_sleep(loaded.poll_interval(), interrupt)?;
            }
            Ok(CycleOutcome::Blocked { hash, failures }) => {
                if blocked_on.as_deref() != Some(hash.as_str()) {
                    report_failures(&hash, &failures);
                    blocked_on = Some(hash);
                }
                idle_sleep(loaded.poll_interval(), interrupt)?;
            }
            Err(err @ Error::StatusConflict { .. }) => {
                warn!(error = %err, "lost a status write race, retrying next cycle");
                idle_sleep(loaded.poll_interval(), interrupt)?;
            }
            Err(err) => {
                error!(error = %err, "watch cycle failed");
                return Err(quit(&format!("cycle_failed:{err}"), 1));
            }
        }
    }
}
