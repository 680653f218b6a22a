//! Per-period metrics recorded during an exploration session.
//!
//! A period spans one policy decision: it opens with the decision that led
//! into it and closes when the next decision is taken.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

pub mod history;

pub use history::{MetricsHistory, Period};

pub const INITIAL_DECISION: &str = "initiate testing";

pub const BLOCK_COUNT: &str = "Client:#Block";
pub const METHOD_COVERAGE: &str = "Client:MethodCoverage";
pub const BRANCH_COVERAGE: &str = "Client:BranchCoverage";
pub const MB_COVERAGE: &str = "Client:MBCoverage";
pub const EXCEPTION_COVERAGE: &str = "Client:ExceptionCoverage";
pub const EXCEPTION_COUNT: &str = "Client:ExceptionCount";
pub const METHOD_DELTA: &str = "Client:MethodCoverageDelta";
pub const BRANCH_DELTA: &str = "Client:BranchCoverageDelta";
pub const FUZZ_TOOL_FAILURE: &str = "Client:FuzzToolFailure";
pub const TIME_PREFIX: &str = "Time:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Int(i64),
    Text(String),
}

impl From<i64> for MetricValue {
    fn from(value: i64) -> Self {
        MetricValue::Int(value)
    }
}

impl From<usize> for MetricValue {
    fn from(value: usize) -> Self {
        MetricValue::Int(value as i64)
    }
}

impl From<String> for MetricValue {
    fn from(value: String) -> Self {
        MetricValue::Text(value)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        MetricValue::Text(value.to_string())
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Int(v) => write!(f, "{v}"),
            MetricValue::Text(v) => write!(f, "{v}"),
        }
    }
}

pub trait MetricsSink: Send {
    /// Set `key` for the current period, replacing an earlier value.
    fn record_metric(&mut self, key: &str, value: MetricValue);

    /// Append a sample to the series `key` of the current period.
    fn collect_value(&mut self, key: &str, value: i64);

    fn record_exception(&mut self, hash: i32);

    /// Open a new period, tagged with the decision that starts it.
    fn start_period(&mut self, decision: Option<&str>);

    fn finish_period(&mut self);

    /// Index of the open period, or of the last one once all are closed.
    fn current_period(&self) -> usize;

    /// Persist everything recorded so far.
    fn flush(&mut self) -> Result<()>;
}
