use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::DecisionPolicy;
use crate::coverage::CoverageWindow;
use crate::device::DeviceSnapshot;

/// Uniformly random exploration over the dispatchable events.
///
/// Relaunches after an escape, resets when nothing is dispatchable and
/// occasionally hands the device to an untimed fuzz burst.
pub struct RandomPolicy {
    rng: StdRng,
    burst_probability: f64,
    burst_ms: u64,
    available_events: usize,
    escaped: bool,
    decisions: usize,
    bursts: usize,
    resets: usize,
}

impl RandomPolicy {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            burst_probability: 0.0,
            burst_ms: 1000,
            available_events: 0,
            escaped: false,
            decisions: 0,
            bursts: 0,
            resets: 0,
        }
    }

    /// Request a `monkey:<burst_ms>` burst with `probability` per decision.
    pub fn with_bursts(mut self, probability: f64, burst_ms: u64) -> Self {
        self.burst_probability = probability.clamp(0.0, 1.0);
        self.burst_ms = burst_ms;
        self
    }
}

impl DecisionPolicy for RandomPolicy {
    fn report_execution(
        &mut self,
        snapshot: &DeviceSnapshot,
        _window: &CoverageWindow,
        escaped: bool,
        _blocked: bool,
    ) {
        self.available_events = snapshot.filtered_raw_events.len();
        self.escaped = escaped;
    }

    fn next_action(&mut self) -> Option<String> {
        self.decisions += 1;

        if self.escaped {
            return Some("start".to_string());
        }
        if self.available_events == 0 {
            self.resets += 1;
            return Some("reset".to_string());
        }
        if self.burst_probability > 0.0 && self.rng.random_bool(self.burst_probability) {
            self.bursts += 1;
            return Some(format!("monkey:{}", self.burst_ms));
        }

        let index = self.rng.random_range(0..self.available_events);
        Some(format!("event:{index}"))
    }

    fn detailed_explanation(&self) -> String {
        format!(
            "random policy: {} decisions, {} bursts, {} resets",
            self.decisions, self.bursts, self.resets
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Action;

    fn snapshot(raw_events: usize) -> DeviceSnapshot {
        DeviceSnapshot {
            filtered_raw_events: (0..raw_events).map(|i| format!("click:{i}")).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_picks_indices_in_range() {
        let mut policy = RandomPolicy::new(7);
        let window = CoverageWindow::default();

        for _ in 0..50 {
            policy.report_execution(&snapshot(4), &window, false, false);
            let action: Action = policy.next_action().unwrap().parse().unwrap();
            match action {
                Action::Event { index } => assert!(index < 4),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_same_seed_same_choices() {
        let window = CoverageWindow::default();
        let mut a = RandomPolicy::new(42);
        let mut b = RandomPolicy::new(42);
        let mut left = Vec::new();
        let mut right = Vec::new();

        for _ in 0..10 {
            a.report_execution(&snapshot(9), &window, false, false);
            b.report_execution(&snapshot(9), &window, false, false);
            left.push(a.next_action());
            right.push(b.next_action());
        }
        assert_eq!(left, right);
    }

    #[test]
    fn test_escape_and_empty_screen() {
        let mut policy = RandomPolicy::new(1);
        let window = CoverageWindow::default();

        policy.report_execution(&snapshot(3), &window, true, false);
        assert_eq!(policy.next_action().as_deref(), Some("start"));

        policy.report_execution(&snapshot(0), &window, false, false);
        assert_eq!(policy.next_action().as_deref(), Some("reset"));
        assert_eq!(
            policy.detailed_explanation(),
            "random policy: 2 decisions, 0 bursts, 1 resets"
        );
    }

    #[test]
    fn test_always_bursts_at_probability_one() {
        let mut policy = RandomPolicy::new(3).with_bursts(1.0, 250);
        policy.report_execution(&snapshot(2), &CoverageWindow::default(), false, false);

        assert_eq!(policy.next_action().as_deref(), Some("monkey:250"));
    }
}
