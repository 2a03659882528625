use chrono::{DateTime, TimeDelta, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Synthetic step recorded once a validated commit has been pushed.
pub(crate) const PUSH_STEP: &str = "Push";
pub(crate) const PUSHED_GLYPH: &str = "☁️";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub(crate) enum ExecutionState {
    #[default]
    Unknown,
    InProgress,
    Failure,
    Success,
}

impl ExecutionState {
    pub(crate) fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => Self::Success,
            _ => Self::Failure,
        }
    }

    pub(crate) fn parse(token: &str) -> Option<Self> {
        Some(match token.trim().to_ascii_lowercase().as_str() {
            "unknown" => Self::Unknown,
            "in_progress" => Self::InProgress,
            "failure" => Self::Failure,
            "success" => Self::Success,
            _ => return None,
        })
    }

    // Earlier releases persisted the state as a 1-based ordinal.
    fn from_ordinal(value: u64) -> Option<Self> {
        Some(match value {
            1 => Self::Unknown,
            2 => Self::InProgress,
            3 => Self::Failure,
            4 => Self::Success,
            _ => return None,
        })
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::InProgress => "in_progress",
            Self::Failure => "failure",
            Self::Success => "success",
        }
    }

    pub(crate) fn glyph(self) -> &'static str {
        match self {
            Self::Unknown => "🌀",
            Self::InProgress => "⏳",
            Self::Failure => "❌",
            Self::Success => "✅",
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ExecutionState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ExecutionState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Tag(String),
            Ordinal(u64),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Tag(tag) => ExecutionState::parse(&tag)
                .ok_or_else(|| D::Error::custom(format!("unknown execution state {tag:?}"))),
            Repr::Ordinal(value) => ExecutionState::from_ordinal(value)
                .ok_or_else(|| D::Error::custom(format!("unknown execution state {value}"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Span {
    pub(crate) start: DateTime<Utc>,
    pub(crate) end: Option<DateTime<Utc>>,
}

impl Span {
    pub(crate) fn open(start: DateTime<Utc>) -> Self {
        Self { start, end: None }
    }

    pub(crate) fn closed(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub(crate) fn instant(at: DateTime<Utc>) -> Self {
        Self::closed(at, at)
    }

    /// Zero while the span is still open.
    pub(crate) fn duration(&self) -> TimeDelta {
        match self.end {
            Some(end) => end - self.start,
            None => TimeDelta::zero(),
        }
    }
}

/// Name and command of the step a result belongs to. Matching is by name only;
/// the command is kept for display.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StepRef {
    pub(crate) name: String,
    pub(crate) cmd: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StepResult {
    pub(crate) step: StepRef,
    pub(crate) state: ExecutionState,
    pub(crate) span: Span,
    pub(crate) log: Option<PathBuf>,
}

impl StepResult {
    pub(crate) fn new(
        name: &str,
        cmd: &str,
        state: ExecutionState,
        span: Span,
        log: Option<PathBuf>,
    ) -> Self {
        Self {
            step: StepRef {
                name: name.to_string(),
                cmd: cmd.to_string(),
            },
            state,
            span,
            log,
        }
    }

    pub(crate) fn unknown(name: &str) -> Self {
        Self::new(
            name,
            "UNKNOWN",
            ExecutionState::Unknown,
            Span::instant(Utc::now()),
            None,
        )
    }

    pub(crate) fn name(&self) -> &str {
        &self.step.name
    }

    /// Last `n_lines` lines of the captured log, or an empty string when there is none.
    pub(crate) fn tail(&self, n_lines: usize) -> String {
        let Some(path) = &self.log else {
            return String::new();
        };
        let Ok(content) = fs::read_to_string(path) else {
            return String::new();
        };
        let lines: Vec<&str> = content.lines().collect();
        let skip = lines.len().saturating_sub(n_lines);
        lines[skip..].join("\n")
    }
}

/// Every step result recorded for one commit. At most one entry per step name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StatusSet {
    #[serde(default)]
    pub(crate) values: Vec<StepResult>,
    /// Bumped on every optimistic write; absent in notes written by older releases.
    #[serde(default)]
    pub(crate) revision: u64,
}

impl StatusSet {
    pub(crate) fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Empty or unreadable notes are not an error: they read as an empty set.
    pub(crate) fn parse_lenient(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Self::default();
        }
        match Self::from_json(trimmed) {
            Ok(statuses) => statuses,
            Err(err) => {
                debug!(error = %err, "discarding unreadable status notes");
                Self::default()
            }
        }
    }

    pub(crate) fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &StepResult> {
        self.values.iter()
    }

    pub(crate) fn names(&self) -> Vec<&str> {
        self.values.iter().map(StepResult::name).collect()
    }

    pub(crate) fn find(&self, name: &str) -> Option<&StepResult> {
        self.values.iter().find(|result| result.name() == name)
    }

    /// The recorded result for `name`, or a fresh `Unknown` one. Never mutates.
    pub(crate) fn get(&self, name: &str) -> StepResult {
        self.find(name)
            .cloned()
            .unwrap_or_else(|| StepResult::unknown(name))
    }

    pub(crate) fn state(&self, name: &str) -> ExecutionState {
        self.find(name)
            .map(|result| result.state)
            .unwrap_or_default()
    }

    /// Insert or overwrite the entry with the same step name.
    pub(crate) fn replace(&mut self, result: StepResult) {
        match self
            .values
            .iter_mut()
            .find(|existing| existing.name() == result.name())
        {
            Some(existing) => *existing = result,
            None => self.values.push(result),
        }
    }

    pub(crate) fn remove(&mut self, name: &str) -> bool {
        let before = self.values.len();
        self.values.retain(|result| result.name() != name);
        self.values.len() != before
    }

    pub(crate) fn all_succeeded<'a, I>(&self, names: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        names
            .into_iter()
            .all(|name| self.state(name) == ExecutionState::Success)
    }

    pub(crate) fn has_failed(&self) -> bool {
        self.values
            .iter()
            .any(|result| result.state == ExecutionState::Failure)
    }

    pub(crate) fn failures(&self) -> Vec<&StepResult> {
        self.values
            .iter()
            .filter(|result| result.state == ExecutionState::Failure)
            .collect()
    }

    pub(crate) fn is_pushed(&self) -> bool {
        self.state(PUSH_STEP) == ExecutionState::Success
    }

    pub(crate) fn total_duration(&self) -> TimeDelta {
        self.values
            .iter()
            .fold(TimeDelta::zero(), |acc, result| acc + result.span.duration())
    }
}

impl fmt::Display for StatusSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for result in &self.values {
            f.write_str(result.state.glyph())?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::Path;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn result(name: &str, state: ExecutionState) -> StepResult {
        StepResult::new(name, "true", state, Span::closed(at(0), at(5)), None)
    }

    #[test]
    fn json_round_trip_preserves_state_span_and_log() {
        let mut statuses = StatusSet::default();
        statuses.replace(StepResult::new(
            "build",
            "cargo build",
            ExecutionState::Success,
            Span::closed(at(0), at(42)),
            Some(PathBuf::from("/tmp/logs/231114-aa85-build.log")),
        ));
        statuses.replace(StepResult::new(
            "test",
            "cargo test",
            ExecutionState::InProgress,
            Span::open(at(43)),
            None,
        ));
        statuses.revision = 7;

        let json = statuses.to_json().expect("serialize");
        let decoded = StatusSet::from_json(&json).expect("deserialize");
        assert_eq!(decoded, statuses);
    }

    #[test]
    fn serialized_form_uses_documented_field_names() {
        let mut statuses = StatusSet::default();
        statuses.replace(result("build", ExecutionState::Failure));
        let value: serde_json::Value =
            serde_json::from_str(&statuses.to_json().unwrap()).unwrap();
        let entry = &value["values"][0];
        assert_eq!(entry["step"]["name"], "build");
        assert_eq!(entry["step"]["cmd"], "true");
        assert_eq!(entry["state"], "failure");
        assert!(entry["span"]["start"].is_string());
        assert!(entry["log"].is_null());
    }

    #[test]
    fn legacy_ordinal_states_are_accepted() {
        let text = r#"{"values":[{"step":{"name":"lint","cmd":"x"},"state":4,"span":{"start":"2024-05-01T10:00:00Z","end":null},"log":null}]}"#;
        let statuses = StatusSet::from_json(text).expect("legacy notes parse");
        assert_eq!(statuses.state("lint"), ExecutionState::Success);
        assert_eq!(statuses.revision, 0);
    }

    #[test]
    fn lenient_parse_falls_back_to_empty() {
        assert!(StatusSet::parse_lenient("").is_empty());
        assert!(StatusSet::parse_lenient("  \n").is_empty());
        assert!(StatusSet::parse_lenient("[✅❌]").is_empty());
        assert!(StatusSet::parse_lenient(r#"{"values": 3}"#).is_empty());
    }

    #[test]
    fn replace_upserts_by_name() {
        let mut statuses = StatusSet::default();
        statuses.replace(result("build", ExecutionState::InProgress));
        statuses.replace(result("build", ExecutionState::Success));
        statuses.replace(result("test", ExecutionState::Failure));
        statuses.replace(result("test", ExecutionState::Success));

        assert_eq!(statuses.values.len(), 2);
        assert_eq!(statuses.names(), vec!["build", "test"]);
        assert_eq!(statuses.state("build"), ExecutionState::Success);
    }

    #[test]
    fn get_missing_step_is_unknown_and_does_not_insert() {
        let statuses = StatusSet::default();
        let missing = statuses.get("deploy");
        assert_eq!(missing.state, ExecutionState::Unknown);
        assert_eq!(missing.name(), "deploy");
        assert!(missing.log.is_none());
        assert_eq!(missing.span.duration(), TimeDelta::zero());
        assert!(statuses.is_empty());
    }

    #[test]
    fn aggregate_queries() {
        let mut statuses = StatusSet::default();
        statuses.replace(result("build", ExecutionState::Success));
        statuses.replace(result("test", ExecutionState::Success));
        assert!(statuses.all_succeeded(["build", "test"]));
        assert!(!statuses.all_succeeded(["build", "test", "lint"]));
        assert!(!statuses.has_failed());
        assert!(!statuses.is_pushed());

        statuses.replace(result("lint", ExecutionState::Failure));
        assert!(statuses.has_failed());
        assert_eq!(statuses.failures().len(), 1);

        statuses.replace(result(PUSH_STEP, ExecutionState::Success));
        assert!(statuses.is_pushed());
        assert_eq!(statuses.total_duration(), TimeDelta::seconds(20));
    }

    #[test]
    fn remove_only_touches_named_step() {
        let mut statuses = StatusSet::default();
        statuses.replace(result("build", ExecutionState::Success));
        statuses.replace(result("test", ExecutionState::Failure));
        assert!(statuses.remove("test"));
        assert!(!statuses.remove("test"));
        assert_eq!(statuses.names(), vec!["build"]);
    }

    #[test]
    fn open_span_has_zero_duration() {
        assert_eq!(Span::open(at(0)).duration(), TimeDelta::zero());
        assert_eq!(
            Span::closed(at(0), at(90)).duration(),
            TimeDelta::seconds(90)
        );
    }

    #[test]
    fn exit_codes_map_to_states() {
        assert_eq!(
            ExecutionState::from_exit_code(Some(0)),
            ExecutionState::Success
        );
        assert_eq!(
            ExecutionState::from_exit_code(Some(2)),
            ExecutionState::Failure
        );
        assert_eq!(ExecutionState::from_exit_code(None), ExecutionState::Failure);
    }

    #[test]
    fn tail_returns_last_lines() {
        let dir = tempfile::tempdir().expect("temp dir");
        let log = dir.path().join("step.log");
        fs::write(&log, "one\ntwo\nthree\nfour\n").expect("write log");
        let mut entry = result("build", ExecutionState::Failure);
        entry.log = Some(log);
        assert_eq!(entry.tail(2), "three\nfour");
        assert_eq!(entry.tail(10), "one\ntwo\nthree\nfour");

        entry.log = Some(Path::new("/nonexistent/vigil.log").to_path_buf());
        assert_eq!(entry.tail(3), "");
    }

    #[test]
    fn display_renders_glyphs() {
        let mut statuses = StatusSet::default();
        statuses.replace(result("build", ExecutionState::Success));
        statuses.replace(result("test", ExecutionState::Failure));
        assert_eq!(statuses.to_string(), "[✅❌]");
    }
}
