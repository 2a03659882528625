use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

use crate::error::{Error, Result};
use crate::status::StatusSet;

/// `git log --pretty=format:` string producing one parseable record per commit.
/// Notes end with a newline, so records are delimited by an ASCII record separator.
pub(crate) const LOG_FORMAT: &str = "C|%h| T|%aI| A|%aN| N|%N|%x1e";
pub(crate) const RECORD_SEPARATOR: char = '\x1e';

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Commit {
    pub(crate) hash: String,
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) author: String,
}

impl Commit {
    pub(crate) fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.timestamp
    }

    pub(crate) fn short_hash(&self) -> &str {
        let end = self
            .hash
            .char_indices()
            .nth(4)
            .map(|(index, _)| index)
            .unwrap_or(self.hash.len());
        &self.hash[..end]
    }
}

impl fmt::Display for Commit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} by {}", self.hash, self.author)
    }
}

/// A commit plus whatever status notes were attached to it in the same log line.
#[derive(Clone, Debug)]
pub(crate) struct LogEntry {
    pub(crate) commit: Commit,
    pub(crate) statuses: StatusSet,
}

fn line_regex() -> &'static Regex {
    static LINE: OnceLock<Regex> = OnceLock::new();
    LINE.get_or_init(|| {
        Regex::new(
            r"^C\|(?P<hash>[^|]*)\| T\|(?P<time>[^|]*)\| A\|(?P<author>.*?)\| N\|(?s:(?P<notes>.*))\|\s*$",
        )
        .expect("log line regex")
    })
}

fn relative_regex() -> &'static Regex {
    static RELATIVE: OnceLock<Regex> = OnceLock::new();
    RELATIVE.get_or_init(|| {
        Regex::new(r"(?i)(\d+)\s*(second|minute|hour|day|week|month|year)s?\b")
            .expect("relative time regex")
    })
}

fn missing_field(line: &str) -> &'static str {
    let tags = [("C|", "hash"), (" T|", "timestamp"), (" A|", "author"), (" N|", "notes")];
    tags.iter()
        .find(|(tag, _)| !line.contains(tag))
        .map(|(_, field)| *field)
        .unwrap_or("well-formed fields")
}

pub(crate) fn parse_log_line(line: &str, now: DateTime<Utc>) -> Result<LogEntry> {
    let line = line.trim();
    let Some(captures) = line_regex().captures(line) else {
        return Err(Error::MalformedLogLine {
            field: missing_field(line),
            line: line.to_string(),
        });
    };

    let hash = captures["hash"].trim();
    if hash.is_empty() {
        return Err(Error::MalformedLogLine {
            field: "hash",
            line: line.to_string(),
        });
    }

    let commit = Commit {
        hash: hash.to_string(),
        timestamp: parse_commit_time(&captures["time"], now)?,
        author: captures["author"].trim().to_string(),
    };
    Ok(LogEntry {
        commit,
        statuses: StatusSet::parse_lenient(&captures["notes"]),
    })
}

/// Accepts either an ISO-8601 timestamp or a relative age such as `16 hours ago`.
pub(crate) fn parse_commit_time(raw: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(timestamp.with_timezone(&Utc));
    }
    let age = parse_relative_age(trimmed)
        .ok_or_else(|| Error::InvalidTimestamp(trimmed.to_string()))?;
    Ok(now - age)
}

pub(crate) fn parse_relative_age(raw: &str) -> Option<TimeDelta> {
    let text = raw.trim();
    let text = text.strip_suffix("ago").unwrap_or(text);
    let mut total = TimeDelta::zero();
    let mut matched = false;
    for captures in relative_regex().captures_iter(text) {
        let amount: i64 = captures[1].parse().ok()?;
        let unit_seconds: i64 = match captures[2].to_ascii_lowercase().as_str() {
            "second" => 1,
            "minute" => 60,
            "hour" => 60 * 60,
            "day" => 24 * 60 * 60,
            "week" => 7 * 24 * 60 * 60,
            "month" => 30 * 24 * 60 * 60,
            "year" => 365 * 24 * 60 * 60,
            _ => return None,
        };
        total += TimeDelta::try_seconds(amount.checked_mul(unit_seconds)?)?;
        matched = true;
    }
    matched.then_some(total)
}
