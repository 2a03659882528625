use shell_escape::unix::escape;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::logger::sanitize_log_value;

pub(crate) fn render_args(args: &[String]) -> String {
    let mut rendered = String::new();
    for arg in args {
        if !rendered.is_empty() {
            rendered.push(' ');
        }
        rendered.push_str(escape(arg.into()).as_ref());
    }
    rendered
}

/// Context exported to every command vigil runs on behalf of a commit.
#[derive(Debug, Clone, Default)]
pub(crate) struct CommandEnv {
    pub(crate) cwd: Option<PathBuf>,
    pub(crate) repo_dir: Option<PathBuf>,
    pub(crate) commit: Option<String>,
    pub(crate) step: Option<String>,
}

impl CommandEnv {
    pub(crate) fn apply(&self, cmd: &mut Command) {
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        Self::apply_optional(
            cmd,
            "VIGIL_REPO_DIR",
            self.repo_dir.as_ref().map(|dir| dir.display().to_string()),
        );
        Self::apply_optional(cmd, "VIGIL_COMMIT", self.commit.clone());
        Self::apply_optional(cmd, "VIGIL_STEP", self.step.clone());
    }

    fn apply_optional(cmd: &mut Command, key: &str, value: Option<String>) {
        match value {
            Some(value) => {
                cmd.env(key, value);
            }
            None => {
                cmd.env_remove(key);
            }
        }
    }
}

fn bash(script: &str) -> Command {
    let mut cmd = Command::new("bash");
    cmd.arg("-c").arg(script);
    cmd
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CommandOutcome {
    pub(crate) exit_code: Option<i32>,
    pub(crate) timed_out: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct LoggedCommand<'a> {
    pub(crate) command: &'a str,
    pub(crate) env: &'a CommandEnv,
    pub(crate) log_file: &'a Path,
    /// Echo output to our own stdout as it arrives.
    pub(crate) stream: bool,
    pub(crate) timeout: Option<Duration>,
}

/// Run `command` through bash with stdout and stderr merged into `log_file`.
pub(crate) fn run_logged(request: &LoggedCommand<'_>) -> io::Result<CommandOutcome> {
    let mut log = File::create(request.log_file)?;
    writeln!(log, "Running {}", request.command)?;

    // Merging in the script keeps both streams in arrival order on one pipe.
    let mut cmd = bash(&format!("exec 2>&1\n{}", request.command));
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    request.env.apply(&mut cmd);

    debug!(
        command = %sanitize_log_value(request.command),
        log = %request.log_file.display(),
        "cmd start"
    );
    let mut child = cmd.spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("child stdout not captured"))?;

    let stream = request.stream;
    let pump = thread::spawn(move || -> io::Result<()> {
        let mut reader = BufReader::new(stdout);
        let mut line = Vec::new();
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            log.write_all(&line)?;
            if stream {
                let mut out = io::stdout().lock();
                out.write_all(&line)?;
                out.flush()?;
            }
        }
        log.flush()
    });

    let (status, timed_out) = match request.timeout {
        Some(limit) => match child.wait_timeout(limit)? {
            Some(status) => (Some(status), false),
            None => {
                warn!(
                    timeout_secs = limit.as_secs(),
                    command = %sanitize_log_value(request.command),
                    "step timed out, killing it"
                );
                child.kill()?;
                child.wait()?;
                (None, true)
            }
        },
        None => (Some(child.wait()?), false),
    };

    // A killed step may leave grandchildren holding the pipe open; do not wait on them.
    if !timed_out {
        match pump.join() {
            Ok(result) => result?,
            Err(_) => warn!("log pump thread panicked"),
        }
    }

    let exit_code = status.and_then(|status| status.code());
    let mut log = OpenOptions::new().append(true).open(request.log_file)?;
    if timed_out {
        writeln!(log, "\nTimed out")?;
    } else {
        writeln!(log, "\nExit code: {}", render_exit_code(exit_code))?;
    }
    debug!(exit = %render_exit_code(exit_code), timed_out, "cmd exit");

    Ok(CommandOutcome {
        exit_code,
        timed_out,
    })
}

fn render_exit_code(code: Option<i32>) -> String {
    code.map(|code| code.to_string())
        .unwrap_or_else(|| "none".to_string())
}

/// Run `command` attached to the terminal and return its exit code.
pub(crate) fn run_interactive(command: &str, env: &CommandEnv) -> io::Result<i32> {
    let mut cmd = bash(command);
    cmd.stdin(Stdio::inherit());
    cmd.stdout(Stdio::inherit());
    cmd.stderr(Stdio::inherit());
    env.apply(&mut cmd);
    debug!(command = %sanitize_log_value(command), "cmd start interactive");
    let status = cmd.status()?;
    Ok(status.code().unwrap_or(1))
}

pub(crate) fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}
