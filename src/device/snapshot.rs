use serde::{Deserialize, Serialize};

use crate::coverage::{BranchId, MethodId};

/// Foreground package name the bridge reports when it cannot tell.
pub const UNKNOWN_PACKAGE: &str = "null";

/// One read of the device state, taken once per iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSnapshot {
    pub app_package_name: String,
    /// Every interaction the bridge can perform on the current screen.
    pub events: Vec<String>,
    /// Events after the bridge's own filtering, for classification.
    pub filtered_events: Vec<String>,
    /// Raw commands matching `filtered_events`, addressed by `event:<index>`.
    pub filtered_raw_events: Vec<String>,
    pub covered_methods: Vec<MethodId>,
    pub covered_branches: Vec<BranchId>,
    /// Signature of a crash seen in the device log since the last read, 0 if none.
    pub logcat_hash: i32,
}

impl DeviceSnapshot {
    pub fn has_exception(&self) -> bool {
        self.logcat_hash != 0
    }
}
