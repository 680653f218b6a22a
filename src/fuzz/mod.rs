//! Control of the on-device randomized input tool (`monkey`).
//!
//! Two modes are supported:
//!
//! - a socket session ([`FuzzToolSession::start`]) where the tool listens on a
//!   device port that adb forwards to the host, and accepts one command per
//!   line until it receives `quit`;
//! - an untimed burst ([`FuzzToolSession::run_untimed_burst`]) that runs the
//!   tool to completion with a synthetic event count.

pub mod error;
pub mod seed;
pub mod session;

#[cfg(test)]
mod tests;

pub use error::FuzzToolError;
pub use seed::SeedCounter;
pub use session::FuzzToolSession;

use std::time::Duration;

use crate::transport::RetryPolicy;

/// Executable name on the device.
pub const FUZZ_TOOL: &str = "monkey";

/// Pattern used to kill stray device-side instances.
pub const FUZZ_TOOL_PROCESS: &str = "com.android.commands.monkey";

/// Sent after connecting; any reply line proves the tool is listening.
pub const LIVENESS_COMMAND: &str = "listvar";

pub const QUIT_COMMAND: &str = "quit";

pub const CONNECT_ATTEMPTS: u32 = 5;
pub const CONNECT_PAUSE: Duration = Duration::from_millis(500);
pub const DEFAULT_CONNECT_RETRY: RetryPolicy = RetryPolicy::new(CONNECT_ATTEMPTS, CONNECT_PAUSE);

/// Delay between synthetic events during an untimed burst.
pub const BURST_THROTTLE_MS: u64 = 10;
