use crossterm::event::{KeyCode, KeyEvent};

use crate::commit::LogEntry;
use crate::config::ConfigSource;
use crate::error::Result;
use crate::git::GitRepo;
use crate::log_view::format_duration;
use crate::status::{ExecutionState, StepResult};

/// Log lines shown under a failed step.
pub(crate) const TAIL_LINES: usize = 20;

/// Dashboard state. Rendering lives in `ui`.
pub(crate) struct App {
    pub(crate) source: ConfigSource,
    pub(crate) should_quit: bool,
    pub(crate) restart_requested: bool,
    pub(crate) watch_running: bool,
    pub(crate) step_names: Vec<String>,
    pub(crate) entries: Vec<LogEntry>,
    pub(crate) selected: usize,
    pub(crate) error: Option<String>,
}

impl App {
    pub(crate) fn new(source: ConfigSource) -> Self {
        Self {
            source,
            should_quit: false,
            restart_requested: false,
            watch_running: false,
            step_names: Vec::new(),
            entries: Vec::new(),
            selected: 0,
            error: None,
        }
    }

    /// Re-read config and history. Failures are shown in the status bar.
    pub(crate) fn refresh_data(&mut self) {
        match self.load_snapshot() {
            Ok((step_names, entries)) => {
                self.apply_snapshot(step_names, entries);
                self.error = None;
            }
            Err(err) => self.error = Some(err.to_string()),
        }
    }

    fn load_snapshot(&self) -> Result<(Vec<String>, Vec<LogEntry>)> {
        let loaded = self.source.load()?;
        let repo = GitRepo::new(loaded.repo_dir());
        let entries = repo.log_entries(loaded.config.history_window)?;
        let step_names = loaded
            .step_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        Ok((step_names, entries))
    }

    pub(crate) fn apply_snapshot(&mut self, step_names: Vec<String>, entries: Vec<LogEntry>) {
        // Keep the same commit selected as new ones arrive on top.
        let selected_hash = self.selected_entry().map(|entry| entry.commit.hash.clone());
        self.step_names = step_names;
        self.entries = entries;
        self.selected = selected_hash
            .and_then(|hash| {
                self.entries
                    .iter()
                    .position(|entry| entry.commit.hash == hash)
            })
            .unwrap_or(0)
            .min(self.entries.len().saturating_sub(1));
    }

    pub(crate) fn selected_entry(&self) -> Option<&LogEntry> {
        self.entries.get(self.selected)
    }

    pub(crate) fn step_name_refs(&self) -> Vec<&str> {
        self.step_names.iter().map(String::as_str).collect()
    }

    pub(crate) fn handle_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('r') => self.restart_requested = true,
            KeyCode::Char('j') | KeyCode::Down => self.select_next(),
            KeyCode::Char('k') | KeyCode::Up => self.select_prev(),
            KeyCode::Home | KeyCode::Char('g') => self.selected = 0,
            _ => {}
        }
    }

    fn select_next(&mut self) {
        if self.selected + 1 < self.entries.len() {
            self.selected += 1;
        }
    }

    fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }
}

/// `✅ build (2 minutes): /path/to.log`, plus a log excerpt for failures.
pub(crate) fn detail_lines(result: &StepResult) -> Vec<String> {
    let log = result
        .log
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "no log".to_string());
    let mut lines = vec![format!(
        "{} {} ({}): {}",
        result.state.glyph(),
        result.name(),
        format_duration(result.span.duration()),
        log
    )];
    if result.state == ExecutionState::Failure {
        lines.push(String::new());
        lines.push("=== Log excerpt ===".to_string());
        lines.extend(result.tail(TAIL_LINES).lines().map(str::to_string));
        lines.push(String::new());
    }
    lines
}
