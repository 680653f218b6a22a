use serde::Serialize;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    BudgetReached,
    TimedOut,
    EmptyFeedback,
    /// The policy asked for `finish`.
    Finished,
    /// The policy returned no action.
    PolicyExhausted,
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::BudgetReached => "experiment finished (iteration budget reached)",
            StopReason::TimedOut => "experiment finished (timeout)",
            StopReason::EmptyFeedback => "received empty event list",
            StopReason::Finished => "experiment finished (requested)",
            StopReason::PolicyExhausted => "received no action from the policy",
            StopReason::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

/// Global stop check, evaluated before every iteration.
pub fn stop_reason(
    cancelled: bool,
    iteration: usize,
    budget: usize,
    elapsed: Duration,
    timeout: Option<Duration>,
) -> Option<StopReason> {
    if cancelled {
        return Some(StopReason::Cancelled);
    }
    if budget != 0 && iteration >= budget {
        return Some(StopReason::BudgetReached);
    }
    if timeout.is_some_and(|limit| elapsed >= limit) {
        return Some(StopReason::TimedOut);
    }
    None
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub stop_reason: StopReason,
    pub iterations: usize,
    pub method_coverage: usize,
    /// Branch coverage minus distinct exception signatures.
    pub branch_coverage: i64,
    pub combined_coverage: usize,
    pub distinct_exceptions: usize,
    pub exception_count: usize,
    pub blocking_count: usize,
    pub elapsed_ms: u64,
    pub note: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_secs(1);

    #[test]
    fn test_no_limits_never_stop() {
        assert_eq!(stop_reason(false, 10_000, 0, SECOND * 10_000, None), None);
    }

    #[test]
    fn test_budget_counts_iterations() {
        assert_eq!(stop_reason(false, 2, 3, SECOND, None), None);
        assert_eq!(
            stop_reason(false, 3, 3, SECOND, None),
            Some(StopReason::BudgetReached)
        );
    }

    #[test]
    fn test_timeout() {
        assert_eq!(stop_reason(false, 0, 0, SECOND * 59, Some(SECOND * 60)), None);
        assert_eq!(
            stop_reason(false, 0, 0, SECOND * 60, Some(SECOND * 60)),
            Some(StopReason::TimedOut)
        );
    }

    #[test]
    fn test_cancellation_wins() {
        assert_eq!(
            stop_reason(true, 5, 5, SECOND * 60, Some(SECOND)),
            Some(StopReason::Cancelled)
        );
    }

    #[test]
    fn test_report_json_names() {
        let report = SessionReport {
            stop_reason: StopReason::EmptyFeedback,
            iterations: 5,
            method_coverage: 3,
            branch_coverage: -1,
            combined_coverage: 3,
            distinct_exceptions: 1,
            exception_count: 2,
            blocking_count: 0,
            elapsed_ms: 40,
            note: String::new(),
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["stop_reason"], "empty_feedback");
        assert_eq!(json["branch_coverage"], -1);
    }
}
