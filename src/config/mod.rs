//! Session configuration.
//!
//! Values are layered, lowest precedence first: built-in defaults, a TOML
//! file, `UI_EXPLORER_*` environment variables, then command-line flags
//! ([`Overrides`]). Every section is optional in the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::device::ResetMethod;
use crate::error::{Error, Result};
use crate::transport::RetryPolicy;


pub const ENV_DEVICE: &str = "UI_EXPLORER_DEVICE";
pub const ENV_PORT: &str = "UI_EXPLORER_PORT";
pub const ENV_OUTPUT_DIR: &str = "UI_EXPLORER_OUTPUT_DIR";
pub const ENV_TIMEOUT: &str = "UI_EXPLORER_TIMEOUT";

pub const PERMISSION_INSTALLER_PACKAGE: &str = "com.google.android.packageinstaller";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ExplorerConfig {
    pub target: TargetConfig,
    pub device: DeviceConfig,
    pub stop: StopConditions,
    pub pacing: Pacing,
    pub classifier: ClassifierRules,
    pub fuzz: FuzzToolConfig,
    pub policy: PolicyConfig,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub package: String,
    /// Launcher used in `launch:<mode>:<package>` events.
    pub launch_mode: String,
    /// Needed only by the `uninstall` reset method.
    pub apk: Option<PathBuf>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            package: String::new(),
            launch_mode: "pm".to_string(),
            apk: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// adb invocation, possibly with leading flags (`adb -H host`).
    pub adb: String,
    /// Device serial; empty means the only attached device.
    pub device: String,
    /// Bridge port. The scripted fuzz tool listens on `port + 1`.
    pub port: u16,
    #[serde(with = "humantime_serde")]
    pub bridge_timeout: Duration,
    pub storage_dir: String,
    pub reset_method: ResetMethod,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            adb: "adb".to_string(),
            device: String::new(),
            port: 7008,
            bridge_timeout: Duration::from_secs(10),
            storage_dir: "/sdcard/ui-explorer".to_string(),
            reset_method: ResetMethod::default(),
        }
    }
}

/// Global stop conditions. Zero disables a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StopConditions {
    pub iterations: usize,
    pub timeout_secs: u64,
}

impl StopConditions {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

/// Settle pauses around device actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pacing {
    #[serde(with = "humantime_serde")]
    pub iteration_settle: Duration,
    #[serde(with = "humantime_serde")]
    pub close_settle: Duration,
    #[serde(with = "humantime_serde")]
    pub reset_settle: Duration,
    #[serde(with = "humantime_serde")]
    pub relaunch_settle: Duration,
    #[serde(with = "humantime_serde")]
    pub blocked_wait: Duration,
    #[serde(with = "humantime_serde")]
    pub launch_settle: Duration,
    #[serde(with = "humantime_serde")]
    pub close_delay: Duration,
    /// Close in two phases: wait `close_delay` first, close on the next
    /// iteration.
    pub wait_before_close: bool,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            iteration_settle: Duration::from_millis(200),
            close_settle: Duration::from_millis(500),
            reset_settle: Duration::from_millis(500),
            relaunch_settle: Duration::from_millis(1000),
            blocked_wait: Duration::from_millis(1000),
            launch_settle: Duration::from_millis(2000),
            close_delay: Duration::from_millis(4000),
            wait_before_close: true,
        }
    }
}

impl Pacing {
    /// No pauses at all.
    pub fn immediate() -> Self {
        Self {
            iteration_settle: Duration::ZERO,
            close_settle: Duration::ZERO,
            reset_settle: Duration::ZERO,
            relaunch_settle: Duration::ZERO,
            blocked_wait: Duration::ZERO,
            launch_settle: Duration::ZERO,
            close_delay: Duration::ZERO,
            wait_before_close: true,
        }
    }
}

/// Inputs to the escaped and blocked classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierRules {
    /// A screen offering exactly this many events is treated as blocked.
    pub blocked_event_count: usize,
    /// Consecutive blocked iterations to wait out before accepting the block.
    pub max_blocked_waits: u32,
    pub permission_installer_package: String,
    /// Filtered event counts that identify the permission dialog.
    pub permission_dialog_event_counts: Vec<usize>,
}

impl Default for ClassifierRules {
    fn default() -> Self {
        Self {
            blocked_event_count: 3,
            max_blocked_waits: 8,
            permission_installer_package: PERMISSION_INSTALLER_PACKAGE.to_string(),
            permission_dialog_event_counts: vec![4, 5],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzToolConfig {
    /// Delay between events in an untimed burst.
    pub throttle_ms: u64,
    pub connect_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub connect_pause: Duration,
}

impl Default for FuzzToolConfig {
    fn default() -> Self {
        Self {
            throttle_ms: crate::fuzz::BURST_THROTTLE_MS,
            connect_attempts: crate::fuzz::CONNECT_ATTEMPTS,
            connect_pause: crate::fuzz::CONNECT_PAUSE,
        }
    }
}

impl FuzzToolConfig {
    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.connect_attempts, self.connect_pause)
    }
}

/// Settings of the built-in random policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Fixed RNG seed; a random one is drawn when unset.
    pub seed: Option<u64>,
    pub burst_probability: f64,
    pub burst_ms: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            seed: None,
            burst_probability: 0.05,
            burst_ms: 1000,
        }
    }
}

/// Values given on the command line. `None` keeps the configured value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub package: Option<String>,
    pub device: Option<String>,
    pub port: Option<u16>,
    pub iterations: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub output_dir: Option<PathBuf>,
    pub apk: Option<PathBuf>,
    pub adb: Option<String>,
    pub seed: Option<u64>,
}

impl ExplorerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, then `path` when given, then the environment.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                    Error::Config(format!("Cannot read {}: {}", path.display(), e))
                })?;
                debug!("Loaded configuration from {}", path.display());
                Self::from_toml(&content)?
            }
            None => Self::default(),
        };
        config.merge_env_vars();
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn merge_env_vars(&mut self) {
        self.merge_env_from(|key| std::env::var(key).ok());
    }

    /// Apply `UI_EXPLORER_*` values looked up through `lookup`.
    pub fn merge_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(device) = lookup(ENV_DEVICE) {
            self.device.device = device;
        }

        if let Some(port) = lookup(ENV_PORT) {
            match port.parse::<u16>() {
                Ok(port) => self.device.port = port,
                Err(_) => warn!("Ignoring {}={:?}: not a port number", ENV_PORT, port),
            }
        }

        if let Some(dir) = lookup(ENV_OUTPUT_DIR) {
            self.output_dir = PathBuf::from(dir);
        }

        if let Some(timeout) = lookup(ENV_TIMEOUT) {
            match timeout.parse::<u64>() {
                Ok(secs) => self.stop.timeout_secs = secs,
                Err(_) => warn!("Ignoring {}={:?}: not a number of seconds", ENV_TIMEOUT, timeout),
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if let Some(package) = overrides.package {
            self.target.package = package;
        }
        if let Some(device) = overrides.device {
            self.device.device = device;
        }
        if let Some(port) = overrides.port {
            self.device.port = port;
        }
        if let Some(iterations) = overrides.iterations {
            self.stop.iterations = iterations;
        }
        if let Some(timeout) = overrides.timeout_secs {
            self.stop.timeout_secs = timeout;
        }
        if let Some(dir) = overrides.output_dir {
            self.output_dir = dir;
        }
        if let Some(apk) = overrides.apk {
            self.target.apk = Some(apk);
        }
        if let Some(adb) = overrides.adb {
            self.device.adb = adb;
        }
        if let Some(seed) = overrides.seed {
            self.policy.seed = Some(seed);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.target.package.trim().is_empty() {
            return Err(Error::Config("target package is required".to_string()));
        }
        if self.target.launch_mode.trim().is_empty() {
            return Err(Error::Config("launch mode must not be empty".to_string()));
        }
        if self.device.port == 0 || self.device.port == u16::MAX {
            return Err(Error::Config(format!(
                "port {} leaves no room for the fuzz tool port",
                self.device.port
            )));
        }
        if self.device.adb.trim().is_empty() {
            return Err(Error::Config("adb command must not be empty".to_string()));
        }
        if self.fuzz.throttle_ms == 0 {
            return Err(Error::Config("fuzz throttle must be positive".to_string()));
        }
        if self.fuzz.connect_attempts == 0 {
            return Err(Error::Config(
                "fuzz tool needs at least one connection attempt".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.policy.burst_probability) {
            return Err(Error::Config(format!(
                "burst probability {} is outside [0, 1]",
                self.policy.burst_probability
            )));
        }
        if self.device.reset_method == ResetMethod::Uninstall && self.target.apk.is_none() {
            return Err(Error::Config(
                "reset method 'uninstall' needs target.apk".to_string(),
            ));
        }
        Ok(())
    }

    /// Port of the scripted fuzz-tool session.
    pub fn fuzz_port(&self) -> u16 {
        self.device.port.saturating_add(1)
    }

    pub fn image_dir(&self) -> PathBuf {
        self.output_dir.join("image")
    }

    pub fn burst_log(&self, period: usize) -> PathBuf {
        self.image_dir().join(format!("monkey{period}"))
    }

    pub fn command_session_log(&self, period: usize) -> PathBuf {
        self.image_dir().join(format!("monkeyC{period}"))
    }

    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join("report.json")
    }

    pub fn history_path(&self) -> PathBuf {
        self.output_dir.join("history.json")
    }
}
