//! Decision policies: what the explorer does next.
//!
//! A policy is told about every accepted iteration through
//! [`DecisionPolicy::report_execution`] and answers with an action string
//! from [`DecisionPolicy::next_action`]. The controller parses that string
//! with [`Action::from_str`](std::str::FromStr).

pub mod action;
pub mod auto_restart;
pub mod random;

pub use action::Action;
pub use auto_restart::AutoRestartAdapter;
pub use random::RandomPolicy;

use crate::coverage::CoverageWindow;
use crate::device::DeviceSnapshot;

pub trait DecisionPolicy: Send {
    fn report_execution(
        &mut self,
        snapshot: &DeviceSnapshot,
        window: &CoverageWindow,
        escaped: bool,
        blocked: bool,
    );

    /// `None` ends the session.
    fn next_action(&mut self) -> Option<String>;

    /// Whether the controller should wrap this policy in an
    /// [`AutoRestartAdapter`] before the session starts.
    fn requires_auto_restart(&self) -> bool {
        false
    }

    fn intermediate_dump(&mut self, _period: usize) {}

    fn final_dump(&mut self) {}

    fn detailed_explanation(&self) -> String {
        String::new()
    }
}

/// Wrap `policy` in an [`AutoRestartAdapter`] when it asks for one.
pub fn prepare(policy: Box<dyn DecisionPolicy>) -> Box<dyn DecisionPolicy> {
    if policy.requires_auto_restart() {
        Box::new(AutoRestartAdapter::new(policy))
    } else {
        policy
    }
}
