use tracing::debug;

use super::DecisionPolicy;
use crate::coverage::CoverageWindow;
use crate::device::DeviceSnapshot;

/// Relaunches the target whenever the last report saw it escaped, so the
/// wrapped policy only decides while the target is in the foreground.
pub struct AutoRestartAdapter {
    inner: Box<dyn DecisionPolicy>,
    escaped: bool,
    restarts: usize,
}

impl AutoRestartAdapter {
    pub fn new(inner: Box<dyn DecisionPolicy>) -> Self {
        Self {
            inner,
            escaped: false,
            restarts: 0,
        }
    }

    pub fn restarts(&self) -> usize {
        self.restarts
    }
}

impl DecisionPolicy for AutoRestartAdapter {
    fn report_execution(
        &mut self,
        snapshot: &DeviceSnapshot,
        window: &CoverageWindow,
        escaped: bool,
        blocked: bool,
    ) {
        self.escaped = escaped;
        self.inner.report_execution(snapshot, window, escaped, blocked);
    }

    fn next_action(&mut self) -> Option<String> {
        if self.escaped {
            self.escaped = false;
            self.restarts += 1;
            debug!("Auto restart #{}", self.restarts);
            return Some("start".to_string());
        }
        self.inner.next_action()
    }

    fn intermediate_dump(&mut self, period: usize) {
        self.inner.intermediate_dump(period);
    }

    fn final_dump(&mut self) {
        self.inner.final_dump();
    }

    fn detailed_explanation(&self) -> String {
        let inner = self.inner.detailed_explanation();
        let restarts = format!("auto restarts: {}", self.restarts);
        if inner.is_empty() {
            restarts
        } else {
            format!("{inner}; {restarts}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::prepare;
    use crate::testing::ScriptedPolicy;

    #[test]
    fn test_escape_yields_start_without_consulting_inner() {
        let inner = ScriptedPolicy::new(["event:0", "finish"]);
        let handle = inner.clone();
        let mut adapter = AutoRestartAdapter::new(Box::new(inner));
        let snapshot = DeviceSnapshot::default();
        let window = CoverageWindow::default();

        adapter.report_execution(&snapshot, &window, true, false);
        assert_eq!(adapter.next_action().as_deref(), Some("start"));

        adapter.report_execution(&snapshot, &window, false, false);
        assert_eq!(adapter.next_action().as_deref(), Some("event:0"));

        assert_eq!(adapter.restarts(), 1);
        assert_eq!(handle.reports().len(), 2);
        assert_eq!(adapter.detailed_explanation(), "auto restarts: 1");
    }

    #[test]
    fn test_prepare_wraps_only_when_requested() {
        let plain = prepare(Box::new(ScriptedPolicy::new(["finish"])));
        assert!(plain.detailed_explanation().is_empty());

        let wrapped = prepare(Box::new(
            ScriptedPolicy::new(["finish"]).with_auto_restart(true),
        ));
        assert_eq!(wrapped.detailed_explanation(), "auto restarts: 0");
    }
}
