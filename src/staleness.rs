use chrono::{DateTime, TimeDelta, Utc};

use crate::commit::Commit;
use crate::status::{ExecutionState, StatusSet};

/// Age assumed for a step with no success anywhere in the window.
const NEVER_SUCCEEDED_DAYS: i64 = 30;

/// Whether `step_name` is due to run again.
///
/// `history` is ordered most recent first. The most recent success of the step
/// in the window is compared against `max_staleness_seconds`; a budget of zero
/// means the step is always due.
pub(crate) fn is_stale(
    history: &[(Commit, StatusSet)],
    max_staleness_seconds: u64,
    step_name: &str,
    now: DateTime<Utc>,
) -> bool {
    let time_since_success = history
        .iter()
        .filter_map(|(_, statuses)| statuses.find(step_name))
        .find(|result| result.state == ExecutionState::Success)
        .map(|result| now - result.span.start)
        .unwrap_or_else(|| TimeDelta::days(NEVER_SUCCEEDED_DAYS));

    let budget = i64::try_from(max_staleness_seconds)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX);
    time_since_success >= budget
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{Span, StepResult};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn commit(hash: &str) -> Commit {
        Commit {
            hash: hash.to_string(),
            timestamp: now(),
            author: "Jane".to_string(),
        }
    }

    fn with_result(
        hash: &str,
        step: &str,
        state: ExecutionState,
        started_ago: TimeDelta,
    ) -> (Commit, StatusSet) {
        let mut statuses = StatusSet::default();
        let start = now() - started_ago;
        statuses.replace(StepResult::new(
            step,
            "true",
            state,
            Span::closed(start, start + TimeDelta::seconds(1)),
            None,
        ));
        (commit(hash), statuses)
    }

    #[test]
    fn recent_success_within_budget_is_fresh() {
        let history = vec![
            (commit("c3"), StatusSet::default()),
            with_result("c2", "test", ExecutionState::Success, TimeDelta::seconds(30)),
        ];
        assert!(!is_stale(&history, 60, "test", now()));
    }

    #[test]
    fn success_older_than_budget_is_stale() {
        let history = vec![
            (commit("c3"), StatusSet::default()),
            with_result("c2", "test", ExecutionState::Success, TimeDelta::seconds(90)),
        ];
        assert!(is_stale(&history, 60, "test", now()));
    }

    #[test]
    fn no_success_in_window_is_stale() {
        let history = vec![
            with_result("c2", "test", ExecutionState::Failure, TimeDelta::seconds(5)),
            with_result("c1", "build", ExecutionState::Success, TimeDelta::seconds(5)),
        ];
        assert!(is_stale(&history, 3600, "test", now()));
        assert!(is_stale(&[], 3600, "test", now()));
    }

    #[test]
    fn budget_longer_than_sentinel_treats_missing_success_as_fresh() {
        assert!(!is_stale(&[], 60 * 24 * 60 * 60, "test", now()));
    }

    #[test]
    fn zero_budget_is_stale_even_after_success_on_previous_commit() {
        let history = vec![
            (commit("head"), StatusSet::default()),
            with_result("prev", "test", ExecutionState::Success, TimeDelta::zero()),
        ];
        assert!(is_stale(&history, 0, "test", now()));
    }

    #[test]
    fn most_recent_success_wins() {
        let history = vec![
            with_result("c3", "test", ExecutionState::Failure, TimeDelta::seconds(1)),
            with_result("c2", "test", ExecutionState::Success, TimeDelta::seconds(10)),
            with_result("c1", "test", ExecutionState::Success, TimeDelta::seconds(1000)),
        ];
        assert!(!is_stale(&history, 20, "test", now()));
        assert!(is_stale(&history, 10, "test", now()));
    }
}
