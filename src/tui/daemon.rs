use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use tracing::{debug, info, warn};

use crate::config::ConfigSource;
use crate::shell::ensure_parent_dir;

/// A background `vigil watch` owned by the dashboard. Killed on drop.
#[derive(Debug)]
pub(crate) struct WatchDaemon {
    program: PathBuf,
    args: Vec<OsString>,
    output: Option<PathBuf>,
    child: Option<Child>,
}

impl WatchDaemon {
    /// `vigil watch --quiet` with the same configuration, using the running executable.
    pub(crate) fn for_config(source: &ConfigSource, output: PathBuf) -> io::Result<Self> {
        let program = std::env::current_exe()?;
        let mut args = vec![OsString::from("watch"), OsString::from("--quiet")];
        args.extend(source.cli_args());
        Ok(Self::new(program, args, Some(output)))
    }

    pub(crate) fn new(program: PathBuf, args: Vec<OsString>, output: Option<PathBuf>) -> Self {
        Self {
            program,
            args,
            output,
            child: None,
        }
    }

    fn output_stdio(&self) -> io::Result<(Stdio, Stdio)> {
        let Some(path) = &self.output else {
            return Ok((Stdio::null(), Stdio::null()));
        };
        ensure_parent_dir(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let stderr = file.try_clone()?;
        Ok((Stdio::from(file), Stdio::from(stderr)))
    }

    pub(crate) fn start(&mut self) -> io::Result<()> {
        if self.is_running() {
            return Ok(());
        }
        let (stdout, stderr) = self.output_stdio()?;
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()?;
        info!(pid = child.id(), program = %self.program.display(), "started watch process");
        self.child = Some(child);
        Ok(())
    }

    pub(crate) fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        debug!(pid = child.id(), "stopping watch process");
        if let Err(err) = child.kill() {
            // Already exited.
            debug!(error = %err, "kill failed");
        }
        if let Err(err) = child.wait() {
            warn!(error = %err, "failed to reap watch process");
        }
    }

    pub(crate) fn restart(&mut self) -> io::Result<()> {
        self.stop();
        self.start()
    }

    pub(crate) fn is_running(&mut self) -> bool {
        match self.child.as_mut().map(Child::try_wait) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                debug!(?status, "watch process exited");
                false
            }
            Some(Err(err)) => {
                warn!(error = %err, "could not poll watch process");
                false
            }
            None => false,
        }
    }
}

impl Drop for WatchDaemon {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sleeper(output: Option<PathBuf>) -> WatchDaemon {
        WatchDaemon::new(
            PathBuf::from("sleep"),
            vec![OsString::from("30")],
            output,
        )
    }

    #[test]
    fn start_stop_and_restart() {
        let mut daemon = sleeper(None);
        assert!(!daemon.is_running());
        daemon.start().expect("start");
        assert!(daemon.is_running());
        let first = daemon.child.as_ref().map(Child::id);

        daemon.restart().expect("restart");
        assert!(daemon.is_running());
        assert_ne!(daemon.child.as_ref().map(Child::id), first);

        daemon.stop();
        assert!(!daemon.is_running());
    }

    #[test]
    fn output_goes_to_file() {
        let temp = TempDir::new().expect("temp dir");
        let output = temp.path().join("logs").join("watch.log");
        let mut daemon = WatchDaemon::new(
            PathBuf::from("sh"),
            vec![OsString::from("-c"), OsString::from("echo hello; echo oops >&2")],
            Some(output.clone()),
        );
        daemon.start().expect("start");
        let mut child = daemon.child.take().expect("child");
        child.wait().expect("wait");
        let contents = std::fs::read_to_string(&output).expect("read output");
        assert!(contents.contains("hello"), "got: {contents}");
        assert!(contents.contains("oops"), "got: {contents}");
    }
}
