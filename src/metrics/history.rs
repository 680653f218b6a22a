use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use super::{MetricValue, MetricsSink};
use crate::error::Result;

#[derive(Debug, Clone, Serialize)]
pub struct Period {
    pub index: usize,
    pub decision: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stats: BTreeMap<String, MetricValue>,
    pub values: BTreeMap<String, Vec<i64>>,
}

impl Period {
    fn new(index: usize, decision: Option<&str>) -> Self {
        Self {
            index,
            decision: decision.map(str::to_string),
            started_at: Utc::now(),
            finished_at: None,
            stats: BTreeMap::new(),
            values: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct HistoryData {
    periods: Vec<Period>,
    /// Occurrences per distinct crash signature.
    exceptions: BTreeMap<i32, usize>,
    #[serde(skip)]
    open: bool,
}

/// In-memory period history, written as JSON on flush when an output path
/// is set.
///
/// Clones share the same history, so a caller can keep a handle while the
/// controller owns another.
#[derive(Debug, Clone, Default)]
pub struct MetricsHistory {
    data: Arc<Mutex<HistoryData>>,
    output: Option<PathBuf>,
}

impl MetricsHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, path: impl AsRef<Path>) -> Self {
        self.output = Some(path.as_ref().to_path_buf());
        self
    }

    fn data(&self) -> MutexGuard<'_, HistoryData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn periods(&self) -> Vec<Period> {
        self.data().periods.clone()
    }

    pub fn decisions(&self) -> Vec<Option<String>> {
        self.data().periods.iter().map(|p| p.decision.clone()).collect()
    }

    /// Value of `key` in the most recent period that recorded it.
    pub fn latest(&self, key: &str) -> Option<MetricValue> {
        self.data()
            .periods
            .iter()
            .rev()
            .find_map(|p| p.stats.get(key).cloned())
    }

    /// Every sample of `key` across all periods, oldest first.
    pub fn samples(&self, key: &str) -> Vec<i64> {
        self.data()
            .periods
            .iter()
            .filter_map(|p| p.values.get(key))
            .flatten()
            .copied()
            .collect()
    }

    pub fn exception_counts(&self) -> BTreeMap<i32, usize> {
        self.data().exceptions.clone()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&*self.data())?)
    }

    fn with_open_period(&self, f: impl FnOnce(&mut Period)) {
        let mut data = self.data();
        if !data.open {
            let index = data.periods.len();
            data.periods.push(Period::new(index, None));
            data.open = true;
        }
        if let Some(period) = data.periods.last_mut() {
            f(period);
        }
    }
}

impl MetricsSink for MetricsHistory {
    fn record_metric(&mut self, key: &str, value: MetricValue) {
        debug!("{} = {}", key, value);
        self.with_open_period(|p| {
            p.stats.insert(key.to_string(), value);
        });
    }

    fn collect_value(&mut self, key: &str, value: i64) {
        self.with_open_period(|p| p.values.entry(key.to_string()).or_default().push(value));
    }

    fn record_exception(&mut self, hash: i32) {
        *self.data().exceptions.entry(hash).or_default() += 1;
    }

    fn start_period(&mut self, decision: Option<&str>) {
        let mut data = self.data();
        if data.open {
            if let Some(period) = data.periods.last_mut() {
                period.finished_at = Some(Utc::now());
            }
        }
        let index = data.periods.len();
        data.periods.push(Period::new(index, decision));
        data.open = true;
    }

    fn finish_period(&mut self) {
        let mut data = self.data();
        if !data.open {
            return;
        }
        if let Some(period) = data.periods.last_mut() {
            period.finished_at = Some(Utc::now());
        }
        data.open = false;
    }

    fn current_period(&self) -> usize {
        self.data().periods.len().saturating_sub(1)
    }

    fn flush(&mut self) -> Result<()> {
        let Some(path) = &self.output else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = self.to_json()?;
        if let Err(e) = std::fs::write(path, json) {
            warn!("Failed to write metrics history to {}: {}", path.display(), e);
            return Err(e.into());
        }
        debug!("Metrics history written to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{BLOCK_COUNT, INITIAL_DECISION};

    #[test]
    fn test_periods_follow_decisions() {
        let mut history = MetricsHistory::new();

        history.start_period(Some(INITIAL_DECISION));
        history.record_metric(BLOCK_COUNT, 0usize.into());
        history.finish_period();
        history.start_period(Some("event:2"));
        history.record_metric(BLOCK_COUNT, 1usize.into());
        history.finish_period();

        assert_eq!(
            history.decisions(),
            vec![Some(INITIAL_DECISION.to_string()), Some("event:2".to_string())]
        );
        assert_eq!(history.current_period(), 1);
        assert_eq!(history.latest(BLOCK_COUNT), Some(MetricValue::Int(1)));
        assert!(history.periods().iter().all(|p| p.finished_at.is_some()));
    }

    #[test]
    fn test_recording_without_open_period_opens_one() {
        let mut history = MetricsHistory::new();

        history.collect_value("Time:draw", 12);
        history.collect_value("Time:draw", 15);

        assert_eq!(history.periods().len(), 1);
        assert_eq!(history.samples("Time:draw"), vec![12, 15]);
    }

    #[test]
    fn test_exceptions_are_counted_per_signature() {
        let mut history = MetricsHistory::new();

        history.record_exception(42);
        history.record_exception(42);
        history.record_exception(-3);

        let counts = history.exception_counts();
        assert_eq!(counts.get(&42), Some(&2));
        assert_eq!(counts.get(&-3), Some(&1));
    }

    #[test]
    fn test_clones_share_history() {
        let history = MetricsHistory::new();
        let mut writer = history.clone();

        writer.start_period(Some("reset"));

        assert_eq!(history.decisions(), vec![Some("reset".to_string())]);
    }

    #[test]
    fn test_flush_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("history.json");
        let mut history = MetricsHistory::new().with_output(&path);
        history.start_period(Some(INITIAL_DECISION));
        history.record_metric("Client:MethodCoverageDelta", "1,4".into());

        history.flush().unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["periods"][0]["decision"], INITIAL_DECISION);
        assert_eq!(json["periods"][0]["stats"]["Client:MethodCoverageDelta"], "1,4");
    }

    #[test]
    fn test_flush_without_output_is_noop() {
        let mut history = MetricsHistory::new();
        assert!(history.flush().is_ok());
    }
}
