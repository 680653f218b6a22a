//! Everything the controller needs from the device under test.
//!
//! - [`DeviceBridge`]: the automation bridge that reports screen state and
//!   coverage and replays events.
//! - [`DeviceDriver`]: app lifecycle and storage housekeeping over adb.

pub mod bridge;
pub mod driver;
pub mod snapshot;

pub use bridge::{DeviceBridge, SocketBridge};
pub use driver::{AdbDeviceDriver, DeviceDriver, ResetMethod, TargetApp};
pub use snapshot::DeviceSnapshot;
