use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};
use crate::status::PUSH_STEP;

pub(crate) const CONFIG_FILE_NAME: &str = "vigil.yml";
const TEMPLATES_REL: &str = ".config/vigil/templates";

pub(crate) const DEFAULT_CONFIG: &str = r#"# vigil validates every new commit by running the steps below, in order.
# Results are stored as git notes on the commit (refs/notes/commits).
steps:
  - name: build
    cmd: "echo 'replace with your build command'"
    # Skip the step if it succeeded on any recent commit within this many seconds.
    max_staleness_seconds: 0
  - name: test
    cmd: "echo 'replace with your test command'"
    max_staleness_seconds: 0

# Stop at the first failing step, and do not touch a commit that already failed.
fail_fast: true
# Run `git push` once every step succeeded on the latest commit.
push_on_success: false
# Wait instead of validating while HEAD has no diff against the trunk branch.
skip_if_no_diff_against_trunk: false
trunk: main
# Shell command run after a cycle leaves every step green.
command_on_success: null
# Kill steps that run longer than this; null disables the limit.
step_timeout_seconds: null
"#;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub(crate) struct StepSpec {
    pub(crate) name: String,
    pub(crate) cmd: String,
    #[serde(default)]
    pub(crate) max_staleness_seconds: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct Config {
    pub(crate) steps: Vec<StepSpec>,
    #[serde(default = "default_fail_fast")]
    pub(crate) fail_fast: bool,
    #[serde(default)]
    pub(crate) push_on_success: bool,
    #[serde(default)]
    pub(crate) skip_if_no_diff_against_trunk: bool,
    #[serde(default = "default_trunk")]
    pub(crate) trunk: String,
    #[serde(default)]
    pub(crate) command_on_success: Option<String>,
    #[serde(default)]
    pub(crate) root_worktree_dir: Option<PathBuf>,
    #[serde(default)]
    pub(crate) log_dir: Option<PathBuf>,
    #[serde(default)]
    pub(crate) workspace_root: Option<PathBuf>,
    #[serde(default = "default_history_window")]
    pub(crate) history_window: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub(crate) poll_interval_ms: u64,
    #[serde(default)]
    pub(crate) step_timeout_seconds: Option<u64>,
}

fn default_fail_fast() -> bool {
    true
}

fn default_trunk() -> String {
    "main".to_string()
}

fn default_history_window() -> usize {
    20
}

fn default_poll_interval_ms() -> u64 {
    1000
}

#[derive(Clone, Debug)]
pub(crate) struct LoadedConfig {
    pub(crate) config: Config,
    pub(crate) path: PathBuf,
    base_dir: PathBuf,
    pub(crate) warnings: Vec<String>,
}

impl LoadedConfig {
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Root of the repository under validation.
    pub(crate) fn repo_dir(&self) -> PathBuf {
        match &self.config.root_worktree_dir {
            Some(dir) => self.resolve(dir),
            None => self.base_dir.clone(),
        }
    }

    pub(crate) fn log_dir(&self) -> PathBuf {
        match &self.config.log_dir {
            Some(dir) => self.resolve(dir),
            None => self.repo_dir().join(".logs"),
        }
    }

    pub(crate) fn workspace_root(&self) -> PathBuf {
        match &self.config.workspace_root {
            Some(dir) => self.resolve(dir),
            None => env::temp_dir(),
        }
    }

    pub(crate) fn step_names(&self) -> Vec<&str> {
        self.config
            .steps
            .iter()
            .map(|step| step.name.as_str())
            .collect()
    }

    pub(crate) fn get_step(&self, name: &str) -> Result<&StepSpec> {
        self.config
            .steps
            .iter()
            .find(|step| step.name == name)
            .ok_or_else(|| Error::UnknownStep {
                name: name.to_string(),
                available: self.step_names().join(", "),
            })
    }

    /// One named step, or every configured step in declaration order.
    pub(crate) fn select_steps(&self, name: Option<&str>) -> Result<Vec<StepSpec>> {
        match name {
            Some(name) => Ok(vec![self.get_step(name)?.clone()]),
            None => Ok(self.config.steps.clone()),
        }
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms)
    }

    pub(crate) fn step_timeout(&self) -> Option<Duration> {
        self.config.step_timeout_seconds.map(Duration::from_secs)
    }

    pub(crate) fn emit_warnings(&self) {
        for key in &self.warnings {
            warn!(key = %key, config = %self.path.display(), "unknown config key");
        }
    }
}

/// Where the configuration came from. Watch reloads it every cycle, and the
/// dashboard hands it to its background watcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ConfigSource {
    File(PathBuf),
    /// A shared template; its relative paths resolve against `workdir`.
    Template {
        name: String,
        path: PathBuf,
        workdir: PathBuf,
    },
}

impl ConfigSource {
    pub(crate) fn path(&self) -> &Path {
        match self {
            Self::File(path) => path,
            Self::Template { path, .. } => path,
        }
    }

    pub(crate) fn load(&self) -> Result<LoadedConfig> {
        let mut loaded = load_config(self.path())?;
        if let Self::Template { workdir, .. } = self {
            loaded.base_dir = workdir.clone();
        }
        Ok(loaded)
    }

    /// Global flags that make another vigil process load the same configuration.
    pub(crate) fn cli_args(&self) -> Vec<OsString> {
        match self {
            Self::File(path) => vec![OsString::from("--config"), path.clone().into_os_string()],
            Self::Template { name, .. } => vec![OsString::from("--template"), OsString::from(name)],
        }
    }
}

pub(crate) fn load_config(path: &Path) -> Result<LoadedConfig> {
    let content = fs::read_to_string(path).map_err(|err| {
        Error::Config(format!("Failed to read config {}: {}", path.display(), err))
    })?;
    let value: Value = serde_yaml::from_str(&content).map_err(|err| {
        Error::Config(format!("Failed to parse config {}: {}", path.display(), err))
    })?;
    let mapping = match value {
        Value::Mapping(mapping) => mapping,
        _ => {
            return Err(Error::Config(format!(
                "Config {} must be a YAML mapping",
                path.display()
            )))
        }
    };

    let warnings = unknown_top_level_keys(&mapping);
    validate_required_fields(&mapping)?;

    let config: Config = serde_path_to_error::deserialize(Value::Mapping(mapping)).map_err(|err| {
        Error::Config(format!(
            "Failed to parse config {}: {}: {}",
            path.display(),
            err.path(),
            err.inner()
        ))
    })?;
    validate_config(&config)?;

    let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok(LoadedConfig {
        config,
        path,
        base_dir,
        warnings,
    })
}

fn unknown_top_level_keys(mapping: &Mapping) -> Vec<String> {
    let allowed = [
        "steps",
        "fail_fast",
        "push_on_success",
        "skip_if_no_diff_against_trunk",
        "trunk",
        "command_on_success",
        "root_worktree_dir",
        "log_dir",
        "workspace_root",
        "history_window",
        "poll_interval_ms",
        "step_timeout_seconds",
    ];

    mapping
        .keys()
        .filter_map(|key| key.as_str().map(|value| value.to_string()))
        .filter(|key| !allowed.contains(&key.as_str()))
        .collect()
}

fn validate_required_fields(mapping: &Mapping) -> Result<()> {
    let key = Value::String("steps".to_string());
    match mapping.get(&key) {
        None => Err(Error::Config(
            "Missing required config value: steps".to_string(),
        )),
        Some(Value::Null) => Err(Error::Config("steps must not be null".to_string())),
        Some(Value::Sequence(steps)) if steps.is_empty() => Err(Error::Config(
            "steps must contain at least one step".to_string(),
        )),
        Some(Value::Sequence(_)) => Ok(()),
        Some(_) => Err(Error::Config("steps must be a list".to_string())),
    }
}

pub(crate) fn validate_config(config: &Config) -> Result<()> {
    let mut seen = HashSet::new();
    for (index, step) in config.steps.iter().enumerate() {
        if step.name.trim().is_empty() {
            return Err(Error::Config(format!(
                "steps[{}].name must not be empty.",
                index
            )));
        }
        if step.name == PUSH_STEP {
            return Err(Error::Config(format!(
                "steps[{}].name {:?} is reserved.",
                index, PUSH_STEP
            )));
        }
        if !seen.insert(step.name.as_str()) {
            return Err(Error::Config(format!(
                "steps[{}].name {:?} is used by more than one step.",
                index, step.name
            )));
        }
        if step.cmd.trim().is_empty() {
            return Err(Error::Config(format!(
                "steps[{}].cmd must not be empty.",
                index
            )));
        }
    }
    if config.history_window < 1 {
        return Err(Error::Config(
            "history_window must be a positive integer (got 0).".to_string(),
        ));
    }
    if config.skip_if_no_diff_against_trunk && config.trunk.trim().is_empty() {
        return Err(Error::Config(
            "trunk must not be empty when skip_if_no_diff_against_trunk is set.".to_string(),
        ));
    }
    if matches!(&config.command_on_success, Some(command) if command.trim().is_empty()) {
        return Err(Error::Config(
            "command_on_success must not be empty; use null to disable it.".to_string(),
        ));
    }
    Ok(())
}

/// Nearest `vigil.yml` in `start` or any of its ancestors.
pub(crate) fn find_config_file(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|candidate| candidate.is_file())
}

/// The single template under `~/.config/vigil/templates` whose file name contains `name`.
pub(crate) fn resolve_template(home: &Path, name: &str) -> Result<PathBuf> {
    let templates_dir = home.join(TEMPLATES_REL);
    let entries = fs::read_dir(&templates_dir).map_err(|err| {
        Error::Config(format!(
            "Failed to read templates directory {}: {}",
            templates_dir.display(),
            err
        ))
    })?;

    let needle = name.to_lowercase();
    let mut available = Vec::new();
    let mut matching = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yml") | Some("yaml")
        );
        if !is_yaml {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().to_string();
        if file_name.to_lowercase().contains(&needle) {
            matching.push(path);
        }
        available.push(file_name);
    }
    available.sort();

    match matching.len() {
        0 => Err(Error::Config(format!(
            "No template in {} matches {:?}. Available: {}",
            templates_dir.display(),
            name,
            available.join(", ")
        ))),
        1 => Ok(matching.remove(0)),
        _ => {
            matching.sort();
            let names: Vec<String> = matching
                .iter()
                .map(|path| path.display().to_string())
                .collect();
            Err(Error::Config(format!(
                "Template {:?} is ambiguous: {}",
                name,
                names.join(", ")
            )))
        }
    }
}
