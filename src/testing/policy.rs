use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::coverage::CoverageWindow;
use crate::device::DeviceSnapshot;
use crate::strategy::DecisionPolicy;

/// What the controller told the policy on one consultation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyReport {
    pub package: String,
    pub window: CoverageWindow,
    pub escaped: bool,
    pub blocked: bool,
}

#[derive(Default)]
struct PolicyScript {
    actions: VecDeque<String>,
    reports: Vec<PolicyReport>,
    intermediate_dumps: Vec<usize>,
    final_dumps: usize,
    auto_restart: bool,
    note: String,
}

/// Policy answering with a fixed list of actions, then `None`.
#[derive(Clone, Default)]
pub struct ScriptedPolicy {
    script: Arc<Mutex<PolicyScript>>,
}

impl ScriptedPolicy {
    pub fn new<I, S>(actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let policy = Self::default();
        policy.script.lock().unwrap().actions = actions.into_iter().map(Into::into).collect();
        policy
    }

    /// `count` copies of `action`.
    pub fn repeating(action: &str, count: usize) -> Self {
        Self::new(std::iter::repeat(action).take(count))
    }

    pub fn with_auto_restart(self, auto_restart: bool) -> Self {
        self.script.lock().unwrap().auto_restart = auto_restart;
        self
    }

    pub fn with_note(self, note: &str) -> Self {
        self.script.lock().unwrap().note = note.to_string();
        self
    }

    pub fn reports(&self) -> Vec<PolicyReport> {
        self.script.lock().unwrap().reports.clone()
    }

    pub fn intermediate_dumps(&self) -> Vec<usize> {
        self.script.lock().unwrap().intermediate_dumps.clone()
    }

    pub fn final_dumps(&self) -> usize {
        self.script.lock().unwrap().final_dumps
    }
}

impl DecisionPolicy for ScriptedPolicy {
    fn report_execution(
        &mut self,
        snapshot: &DeviceSnapshot,
        window: &CoverageWindow,
        escaped: bool,
        blocked: bool,
    ) {
        self.script.lock().unwrap().reports.push(PolicyReport {
            package: snapshot.app_package_name.clone(),
            window: window.clone(),
            escaped,
            blocked,
        });
    }

    fn next_action(&mut self) -> Option<String> {
        self.script.lock().unwrap().actions.pop_front()
    }

    fn requires_auto_restart(&self) -> bool {
        self.script.lock().unwrap().auto_restart
    }

    fn intermediate_dump(&mut self, period: usize) {
        self.script.lock().unwrap().intermediate_dumps.push(period);
    }

    fn final_dump(&mut self) {
        self.script.lock().unwrap().final_dumps += 1;
    }

    fn detailed_explanation(&self) -> String {
        self.script.lock().unwrap().note.clone()
    }
}
