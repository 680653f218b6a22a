use std::collections::BTreeSet;

use crate::config::ClassifierRules;
use crate::device::snapshot::UNKNOWN_PACKAGE;
use crate::device::DeviceSnapshot;

/// Progress of an explicit close.
///
/// `close` with a pre-close wait arms the close; the next iteration performs
/// it and leaves the state pending until the target is seen off screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CloseState {
    #[default]
    Normal,
    /// A close or reset was just performed. Coverage is not credited and
    /// the next escape is expected rather than relaunched.
    ClosePending,
    /// The pre-close wait was issued; the next iteration closes the app.
    CloseArmed,
}

impl CloseState {
    pub fn counts_coverage(self) -> bool {
        self != CloseState::ClosePending
    }
}

/// Working state of the control loop.
#[derive(Debug, Default, Clone)]
pub struct SessionState {
    /// Consecutive blocked iterations waited out so far.
    pub wait_counter: u32,
    /// Iterations since the last reset or launch.
    pub counter_after_last_reset: usize,
    pub close: CloseState,
    pub blocking_count: usize,
    pub exception_count: usize,
    pub distinct_exceptions: BTreeSet<i32>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_exception(&mut self, hash: i32) {
        self.distinct_exceptions.insert(hash);
        self.exception_count += 1;
    }

    /// Reported branch coverage: every distinct crash signature is treated
    /// as one branch already counted, and subtracted. May be negative.
    pub fn adjusted_branch_coverage(&self, branch_count: usize) -> i64 {
        branch_count as i64 - self.distinct_exceptions.len() as i64
    }
}

/// Whether the foreground app is something other than the target.
///
/// The permission dialog of the package installer and the unknown-package
/// sentinel do not count as leaving the target.
pub fn classify_escape(rules: &ClassifierRules, target: &str, snapshot: &DeviceSnapshot) -> bool {
    let package = snapshot.app_package_name.as_str();
    if package == target {
        return false;
    }
    if package == rules.permission_installer_package
        && rules
            .permission_dialog_event_counts
            .contains(&snapshot.filtered_events.len())
    {
        return false;
    }
    package != UNKNOWN_PACKAGE
}

pub fn is_blocked(rules: &ClassifierRules, snapshot: &DeviceSnapshot) -> bool {
    snapshot.events.len() == rules.blocked_event_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PERMISSION_INSTALLER_PACKAGE;
    use crate::testing::snapshot;

    const TARGET: &str = "com.example.app";

    #[test]
    fn test_target_in_foreground_is_not_escaped() {
        let rules = ClassifierRules::default();
        assert!(!classify_escape(&rules, TARGET, &snapshot(TARGET, 6)));
    }

    #[test]
    fn test_other_package_is_escaped() {
        let rules = ClassifierRules::default();
        assert!(classify_escape(&rules, TARGET, &snapshot("com.android.launcher3", 6)));
    }

    #[test]
    fn test_permission_dialog_is_not_escaped() {
        let rules = ClassifierRules::default();

        for count in [4, 5] {
            assert!(!classify_escape(
                &rules,
                TARGET,
                &snapshot(PERMISSION_INSTALLER_PACKAGE, count)
            ));
        }
        for count in [3, 6] {
            assert!(classify_escape(
                &rules,
                TARGET,
                &snapshot(PERMISSION_INSTALLER_PACKAGE, count)
            ));
        }
    }

    #[test]
    fn test_permission_dialog_uses_filtered_events() {
        let rules = ClassifierRules::default();
        let mut dialog = snapshot(PERMISSION_INSTALLER_PACKAGE, 4);
        dialog.events.push("back".to_string());
        dialog.events.push("menu".to_string());

        assert!(!classify_escape(&rules, TARGET, &dialog));
    }

    #[test]
    fn test_unknown_package_is_not_escaped() {
        let rules = ClassifierRules::default();
        assert!(!classify_escape(&rules, TARGET, &snapshot("null", 0)));
        assert!(!classify_escape(&rules, TARGET, &snapshot("null", 12)));
    }

    #[test]
    fn test_blocked_threshold() {
        let mut rules = ClassifierRules::default();
        assert!(is_blocked(&rules, &snapshot(TARGET, 3)));
        assert!(!is_blocked(&rules, &snapshot(TARGET, 2)));
        assert!(!is_blocked(&rules, &snapshot(TARGET, 4)));

        rules.blocked_event_count = 2;
        assert!(is_blocked(&rules, &snapshot(TARGET, 2)));
    }

    #[test]
    fn test_close_pending_withholds_coverage() {
        assert!(CloseState::Normal.counts_coverage());
        assert!(CloseState::CloseArmed.counts_coverage());
        assert!(!CloseState::ClosePending.counts_coverage());
    }

    #[test]
    fn test_exception_tracking() {
        let mut state = SessionState::new();
        state.record_exception(11);
        state.record_exception(11);
        state.record_exception(-4);

        assert_eq!(state.exception_count, 3);
        assert_eq!(state.distinct_exceptions.len(), 2);
    }

    #[test]
    fn test_adjusted_branch_coverage_arithmetic() {
        let mut state = SessionState::new();
        assert_eq!(state.adjusted_branch_coverage(10), 10);

        state.record_exception(1);
        state.record_exception(1);
        state.record_exception(2);
        assert_eq!(state.adjusted_branch_coverage(10), 8);
        assert_eq!(state.adjusted_branch_coverage(1), -1);
        assert_eq!(state.adjusted_branch_coverage(0), -2);
    }
}
