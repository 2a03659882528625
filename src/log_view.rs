use chrono::{DateTime, Local, TimeDelta, Utc};
use std::fmt::Write as _;

use crate::commit::LogEntry;
use crate::status::{ExecutionState, StatusSet, StepResult, PUSHED_GLYPH};

/// Coarse human duration such as `2 minutes` or `an hour`.
pub(crate) fn format_duration(delta: TimeDelta) -> String {
    let seconds = delta.num_seconds().max(0);
    const MINUTE: i64 = 60;
    const HOUR: i64 = 60 * MINUTE;
    const DAY: i64 = 24 * HOUR;
    const MONTH: i64 = 30 * DAY;
    const YEAR: i64 = 365 * DAY;

    let plural = |count: i64, unit: &str| {
        if count == 1 {
            format!("1 {unit}")
        } else {
            format!("{count} {unit}s")
        }
    };

    match seconds {
        0 => "a moment".to_string(),
        s if s < MINUTE => plural(s, "second"),
        s if s < 2 * MINUTE => "a minute".to_string(),
        s if s < HOUR => plural(s / MINUTE, "minute"),
        s if s < 2 * HOUR => "an hour".to_string(),
        s if s < DAY => plural(s / HOUR, "hour"),
        s if s < 2 * DAY => "a day".to_string(),
        s if s < MONTH => plural(s / DAY, "day"),
        s if s < 2 * MONTH => "a month".to_string(),
        s if s < YEAR => plural(s / MONTH, "month"),
        s if s < 2 * YEAR => "a year".to_string(),
        s => plural(s / YEAR, "year"),
    }
}

/// One glyph per configured step, in configuration order.
pub(crate) fn step_glyphs(statuses: &StatusSet, step_names: &[&str]) -> String {
    step_names
        .iter()
        .map(|name| statuses.state(name).glyph())
        .collect()
}

fn header_abbreviation(step_names: &[&str]) -> String {
    step_names
        .iter()
        .map(|name| name.chars().take(2).collect::<String>())
        .collect()
}

pub(crate) fn render_table(entries: &[LogEntry], step_names: &[&str], now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<6} {:<width$} {:<16} {:<12}",
        "",
        header_abbreviation(step_names),
        "",
        "took",
        width = step_names.len() * 2,
    );
    for entry in entries {
        let pushed = if entry.statuses.is_pushed() {
            PUSHED_GLYPH
        } else {
            ""
        };
        let _ = writeln!(
            out,
            "{:<6} {} {:<16} {:<12} {}",
            entry.commit.short_hash(),
            step_glyphs(&entry.statuses, step_names),
            format!("{} ago", format_duration(entry.commit.age(now))),
            format_duration(entry.statuses.total_duration()),
            pushed,
        );
    }
    out
}

/// The newest commit that either failed or passed every step.
pub(crate) fn last_status_line(entries: &[LogEntry], step_names: &[&str]) -> String {
    for entry in entries {
        if let Some(failure) = entry.statuses.failures().first() {
            let log = failure
                .log
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "no log".to_string());
            return format!(
                "{} Latest failed: {} ({})\n\t{}",
                ExecutionState::Failure.glyph(),
                entry.commit.short_hash(),
                failure.name(),
                log
            );
        }
        if entry.statuses.all_succeeded(step_names.iter().copied()) {
            return format!(
                "{} Latest success: {}",
                ExecutionState::Success.glyph(),
                entry.commit.short_hash()
            );
        }
    }
    "No commit has passing steps yet".to_string()
}

/// The full `log` screen: table, last status and the wall clock.
pub(crate) fn render_log(entries: &[LogEntry], step_names: &[&str], now: DateTime<Local>) -> String {
    format!(
        "{}\n{}\n\n{}\n",
        render_table(entries, step_names, now.with_timezone(&Utc)),
        last_status_line(entries, step_names),
        now.format("%H:%M:%S")
    )
}

/// Selected steps that are not `Success` on the commit, in the given order.
pub(crate) fn unfinished_steps(statuses: &StatusSet, step_names: &[&str]) -> Vec<StepResult> {
    step_names
        .iter()
        .map(|name| statuses.get(name))
        .filter(|result| result.state != ExecutionState::Success)
        .collect()
}

pub(crate) fn render_check_failures(results: &[StepResult]) -> String {
    let mut out = String::new();
    for result in results {
        let _ = write!(out, "{} {}", result.state.glyph(), result.name());
        match &result.log {
            Some(log) => {
                let _ = writeln!(out, ": {}", log.display());
            }
            None => out.push('\n'),
        }
    }
    out
}
