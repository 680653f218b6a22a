//! Test doubles for the device bridge, device driver, decision policy and
//! fuzz tool.
//!
//! Every double is a cheap `Clone` handle over shared state: hand one clone
//! to the code under test and keep another to inspect what happened.

pub mod bridge;
pub mod driver;
pub mod fake_fuzz_tool;
pub mod policy;

pub use bridge::ScriptedBridge;
pub use driver::RecordingDriver;
pub use fake_fuzz_tool::FakeFuzzTool;
pub use policy::{PolicyReport, ScriptedPolicy};

use crate::device::DeviceSnapshot;

/// A snapshot of `package` offering `event_count` events, all dispatchable
/// as `click:<i>`.
pub fn snapshot(package: &str, event_count: usize) -> DeviceSnapshot {
    let events: Vec<String> = (0..event_count).map(|i| format!("click:{i}")).collect();
    DeviceSnapshot {
        app_package_name: package.to_string(),
        events: events.clone(),
        filtered_events: events.clone(),
        filtered_raw_events: events,
        ..Default::default()
    }
}
