//! The exploration control loop.
//!
//! Each iteration pulls one snapshot from the device bridge, credits its
//! coverage, classifies the screen, and either handles the situation itself
//! (relaunch after an escape, waiting out a blocked screen, finishing a
//! two-phase close) or asks the decision policy for the next action and
//! dispatches it. Iterations never overlap.

pub mod cancel;
pub mod report;
pub mod state;
pub mod timing;


pub use cancel::{install_signal_handlers, CancellationFlag};
pub use report::{stop_reason, SessionReport, StopReason};
pub use state::{classify_escape, is_blocked, CloseState, SessionState};

use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::ExplorerConfig;
use crate::coverage::{join_ids, CoverageLedger};
use crate::device::{DeviceBridge, DeviceDriver, DeviceSnapshot};
use crate::error::{Error, Result};
use crate::fuzz::FuzzToolSession;
use crate::metrics::{self, MetricValue, MetricsSink};
use crate::strategy::{self, Action, DecisionPolicy};

pub const WAIT_COMMAND: &str = "wait";
pub const NOP_COMMAND: &str = "nop";
pub const END_COMMAND: &str = "end";

enum Flow {
    Next,
    Stop(StopReason),
}

pub struct ExplorationController {
    config: ExplorerConfig,
    bridge: Box<dyn DeviceBridge>,
    driver: Box<dyn DeviceDriver>,
    policy: Box<dyn DecisionPolicy>,
    metrics: Box<dyn MetricsSink>,
    fuzz: FuzzToolSession,
    cancel: CancellationFlag,
    ledger: CoverageLedger,
    state: SessionState,
    iterations: usize,
}

impl ExplorationController {
    /// The policy is wrapped in an auto-restart adapter here if it asks for
    /// one.
    pub fn new(
        config: ExplorerConfig,
        bridge: Box<dyn DeviceBridge>,
        driver: Box<dyn DeviceDriver>,
        policy: Box<dyn DecisionPolicy>,
        metrics: Box<dyn MetricsSink>,
        fuzz: FuzzToolSession,
    ) -> Self {
        Self {
            config,
            bridge,
            driver,
            policy: strategy::prepare(policy),
            metrics,
            fuzz,
            cancel: CancellationFlag::new(),
            ledger: CoverageLedger::new(),
            state: SessionState::new(),
            iterations: 0,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn ledger(&self) -> &CoverageLedger {
        &self.ledger
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Run the session to completion.
    ///
    /// Stop conditions produce `Ok`. An unrecognized action, an event index
    /// outside the snapshot, or a device failure produce `Err`, after the
    /// same best-effort finalization.
    pub async fn run(&mut self) -> Result<SessionReport> {
        let started = Instant::now();

        self.bridge
            .start(self.config.device.bridge_timeout, self.config.device.port)
            .await?;
        self.metrics.start_period(Some(metrics::INITIAL_DECISION));
        if let Err(e) = self.driver.wake_up_device().await {
            warn!("Failed to wake up device: {}", e);
        }

        match self.explore(started).await {
            Ok(reason) => {
                info!("Terminate: {}", reason);
                self.finalize().await;
                Ok(self.report(reason, started.elapsed()))
            }
            Err(e) => {
                error!("Terminate: {}", e);
                self.finalize().await;
                Err(e)
            }
        }
    }

    async fn explore(&mut self, started: Instant) -> Result<StopReason> {
        let pacing = self.config.pacing.clone();

        loop {
            let i = self.iterations;
            if let Some(reason) = stop_reason(
                self.cancel.is_cancelled(),
                i,
                self.config.stop.iterations,
                started.elapsed(),
                self.config.stop.timeout(),
            ) {
                return Ok(reason);
            }

            info!("============ iteration {} ============", i);
            tokio::time::sleep(pacing.iteration_settle).await;
            self.bridge.send_heartbeat(i).await?;
            let snapshot = self.bridge.get_data().await?;

            if snapshot.events.is_empty() {
                error!("Received empty event list");
                return Ok(StopReason::EmptyFeedback);
            }

            self.ingest_timing().await;

            let flow = self.iterate(i, &snapshot).await?;
            self.iterations += 1;
            self.state.counter_after_last_reset += 1;

            if let Flow::Stop(reason) = flow {
                return Ok(reason);
            }
        }
    }

    async fn iterate(&mut self, i: usize, snapshot: &DeviceSnapshot) -> Result<Flow> {
        let rules = self.config.classifier.clone();
        let pacing = self.config.pacing.clone();

        if self.state.close.counts_coverage() {
            self.credit_coverage(snapshot);
        }

        if snapshot.has_exception() {
            self.state.record_exception(snapshot.logcat_hash);
            self.metrics.record_exception(snapshot.logcat_hash);
        }

        if i == 0 {
            self.driver.reset_app().await?;
            self.state.close = CloseState::ClosePending;
        }

        let escaped = classify_escape(&rules, &self.config.target.package, snapshot);
        let mut blocked = false;

        if self.state.close == CloseState::CloseArmed {
            info!("Close: closing the app");
            self.close_and_reset().await?;
            self.state.close = CloseState::ClosePending;
            return Ok(Flow::Next);
        }

        if escaped {
            self.state.wait_counter = 0;
            info!(
                "Escaped to {} ({} events)",
                snapshot.app_package_name,
                snapshot.filtered_events.len()
            );

            if self.state.counter_after_last_reset < 1 && self.state.close == CloseState::Normal {
                self.launch().await?;
                tokio::time::sleep(pacing.relaunch_settle).await;
                self.ingest_timing().await;
                return Ok(Flow::Next);
            }
            if self.state.close == CloseState::ClosePending {
                self.state.close = CloseState::Normal;
            }
        } else {
            blocked = is_blocked(&rules, snapshot);
            if blocked && self.state.wait_counter < rules.max_blocked_waits {
                self.state.wait_counter += 1;
                info!("Blocking state: wait a while ({})", self.state.wait_counter);
                tokio::time::sleep(pacing.blocked_wait).await;
                self.bridge.send_event(WAIT_COMMAND).await?;
                self.ingest_timing().await;
                return Ok(Flow::Next);
            }
            if blocked {
                self.state.blocking_count += 1;
                info!("Blocking state: accept blocking state");
            } else if self.state.wait_counter != 0 {
                info!("Blocking state: escaped");
            }
        }

        self.state.wait_counter = 0;

        self.policy
            .report_execution(snapshot, self.ledger.window(), escaped, blocked);
        self.ledger.reset_window();

        self.policy.intermediate_dump(self.metrics.current_period());
        self.record_period_stats();
        self.metrics.finish_period();

        let action = self.policy.next_action();
        info!("Action returned: {:?}", action);
        self.metrics.start_period(action.as_deref());

        match action {
            None => Ok(Flow::Stop(StopReason::PolicyExhausted)),
            Some(action) => self.dispatch(action.parse()?, snapshot).await,
        }
    }

    async fn dispatch(&mut self, action: Action, snapshot: &DeviceSnapshot) -> Result<Flow> {
        let pacing = self.config.pacing.clone();

        match action {
            Action::Finish => return Ok(Flow::Stop(StopReason::Finished)),
            Action::Reset => {
                info!("Reset: closing the app");
                self.send_close().await?;
                tokio::time::sleep(pacing.close_settle).await;
                self.driver.reset_app().await?;
                self.launch().await?;
                tokio::time::sleep(pacing.launch_settle).await;
                self.ingest_timing().await;
                self.state.counter_after_last_reset = 0;
            }
            Action::Start => {
                info!("Start: starting the app");
                self.launch().await?;
                tokio::time::sleep(pacing.launch_settle).await;
                self.ingest_timing().await;
                self.state.counter_after_last_reset = 0;
            }
            Action::Close if pacing.wait_before_close => {
                info!("Close: wait a while before closing");
                tokio::time::sleep(pacing.close_delay).await;
                self.bridge.send_event(WAIT_COMMAND).await?;
                self.ingest_timing().await;
                self.state.close = CloseState::CloseArmed;
            }
            Action::Close => {
                info!("Close: closing the app");
                self.close_and_reset().await?;
                self.state.close = CloseState::ClosePending;
            }
            Action::Monkey { duration_ms } => {
                self.run_burst(duration_ms).await;
                self.bridge.send_event(NOP_COMMAND).await?;
                self.ingest_timing().await;
            }
            Action::CommandMonkey { script } => {
                self.run_command_session(&script).await?;
            }
            Action::Event { index } => {
                let raw = snapshot.filtered_raw_events.get(index).ok_or(
                    Error::EventIndexOutOfRange {
                        index,
                        available: snapshot.filtered_raw_events.len(),
                    },
                )?;
                self.bridge.send_event(raw).await?;
                self.ingest_timing().await;
            }
        }
        Ok(Flow::Next)
    }

    fn credit_coverage(&mut self, snapshot: &DeviceSnapshot) {
        self.ledger.add(
            snapshot.covered_methods.iter().copied(),
            snapshot.covered_branches.iter().copied(),
        );

        let branches = self.ledger.latest_branch_delta();
        if !branches.is_empty() {
            self.metrics
                .record_metric(metrics::BRANCH_DELTA, join_ids(branches).into());
        }
        let methods = self.ledger.latest_method_delta();
        if !methods.is_empty() {
            self.metrics
                .record_metric(metrics::METHOD_DELTA, join_ids(methods).into());
        }
    }

    fn record_period_stats(&mut self) {
        let branch = self
            .state
            .adjusted_branch_coverage(self.ledger.branch_coverage_count());
        let stats: [(&str, MetricValue); 6] = [
            (metrics::BLOCK_COUNT, self.state.blocking_count.into()),
            (
                metrics::METHOD_COVERAGE,
                self.ledger.method_coverage_count().into(),
            ),
            (metrics::BRANCH_COVERAGE, branch.into()),
            (
                metrics::MB_COVERAGE,
                self.ledger.combined_coverage_metric().into(),
            ),
            (
                metrics::EXCEPTION_COVERAGE,
                self.state.distinct_exceptions.len().into(),
            ),
            (metrics::EXCEPTION_COUNT, self.state.exception_count.into()),
        ];
        for (key, value) in stats {
            self.metrics.record_metric(key, value);
        }
    }

    /// Record each `key:value` profiling entry as `Time:<key>`.
    async fn ingest_timing(&mut self) {
        let entries = match self.bridge.get_timing().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read timing data: {}", e);
                return;
            }
        };

        for entry in entries {
            match timing::parse_timing_entry(&entry) {
                Some((key, value)) => {
                    info!("Time: {}", entry);
                    self.metrics
                        .collect_value(&format!("{}{}", metrics::TIME_PREFIX, key), value);
                }
                None => warn!("Ignoring malformed timing entry {:?}", entry),
            }
        }
    }

    fn launch_event(&self) -> String {
        format!(
            "launch:{}:{}",
            self.config.target.launch_mode, self.config.target.package
        )
    }

    async fn launch(&mut self) -> Result<()> {
        let event = self.launch_event();
        info!("Launch target package: {}", event);
        self.bridge.send_event(&event).await
    }

    async fn send_close(&mut self) -> Result<()> {
        let event = format!("closeapp:pm:{}", self.config.target.package);
        self.bridge.send_event(&event).await
    }

    async fn close_and_reset(&mut self) -> Result<()> {
        let pacing = self.config.pacing.clone();
        self.send_close().await?;
        tokio::time::sleep(pacing.close_settle).await;
        self.driver.reset_app().await?;
        tokio::time::sleep(pacing.reset_settle).await;
        self.ingest_timing().await;
        Ok(())
    }

    async fn run_burst(&mut self, duration_ms: u64) {
        let log = self.config.burst_log(self.metrics.current_period());
        ensure_parent(&log).await;
        info!("Untimed fuzz burst for {} ms", duration_ms);

        let package = self.config.target.package.clone();
        match self.fuzz.run_untimed_burst(duration_ms, &package, &log).await {
            Ok(status) if !status.success() => {
                warn!("Fuzz burst exited with {:?}", status);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Fuzz burst failed: {}", e);
                self.metrics
                    .record_metric(metrics::FUZZ_TOOL_FAILURE, e.to_string().into());
            }
        }
    }

    /// Hand the device to a scripted fuzz session, then bring the bridge back.
    async fn run_command_session(&mut self, script: &str) -> Result<()> {
        let log = self.config.command_session_log(self.metrics.current_period());
        ensure_parent(&log).await;
        info!("Commanding fuzz tool");

        self.bridge.stop().await?;

        let package = self.config.target.package.clone();
        let outcome = match self
            .fuzz
            .start(&package, &log, self.config.fuzz_port())
            .await
        {
            Ok(()) => self.fuzz.send_batch_and_wait(script).await.map(|status| {
                info!("Fuzz session finished with {:?}", status);
            }),
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            warn!("Fuzz tool unavailable, continuing without it: {}", e);
            self.metrics
                .record_metric(metrics::FUZZ_TOOL_FAILURE, e.to_string().into());
            self.fuzz.stop().await;
        }

        self.bridge
            .start(self.config.device.bridge_timeout, self.config.device.port)
            .await?;
        if let Err(e) = self.driver.wake_up_device().await {
            warn!("Failed to wake up device: {}", e);
        }
        Ok(())
    }

    /// Best effort: every step runs even if an earlier one failed.
    async fn finalize(&mut self) {
        if let Err(e) = self.bridge.send_event(END_COMMAND).await {
            warn!("Failed to send {} command: {}", END_COMMAND, e);
        }
        self.metrics.finish_period();
        if let Err(e) = self.metrics.flush() {
            warn!("Failed to flush metrics: {}", e);
        }
        if let Err(e) = self.driver.clear_storage().await {
            warn!("Failed to clear device storage: {}", e);
        }
        self.policy.final_dump();
        self.fuzz.stop().await;
        if let Err(e) = self.bridge.stop().await {
            warn!("Failed to stop device bridge: {}", e);
        }
    }

    fn report(&self, stop_reason: StopReason, elapsed: Duration) -> SessionReport {
        SessionReport {
            stop_reason,
            iterations: self.iterations,
            method_coverage: self.ledger.method_coverage_count(),
            branch_coverage: self
                .state
                .adjusted_branch_coverage(self.ledger.branch_coverage_count()),
            combined_coverage: self.ledger.combined_coverage_metric(),
            distinct_exceptions: self.state.distinct_exceptions.len(),
            exception_count: self.state.exception_count,
            blocking_count: self.state.blocking_count,
            elapsed_ms: elapsed.as_millis() as u64,
            note: self.policy.detailed_explanation(),
        }
    }
}

async fn ensure_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            warn!("Cannot create {}: {}", parent.display(), e);
        }
    }
}
