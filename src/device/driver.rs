use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::adb::Adb;
use crate::error::{Error, Result};
use crate::subprocess::{ProcessCommand, SubprocessManager};

/// How an app is brought back to a fresh state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResetMethod {
    /// Uninstall and reinstall from the configured APK.
    Uninstall,
    /// Force-stop, then clear data.
    #[default]
    ForceStop,
    /// Clear data without stopping first.
    ClearData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetApp {
    pub package: String,
    pub apk: Option<PathBuf>,
}

#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Return the target app to a fresh state, including its shared storage.
    async fn reset_app(&self) -> Result<()>;

    async fn wake_up_device(&self) -> Result<()>;

    async fn clear_storage(&self) -> Result<()>;
}

pub struct AdbDeviceDriver {
    adb: Adb,
    subprocess: SubprocessManager,
    target: TargetApp,
    reset_method: ResetMethod,
    storage_dir: String,
    install_settle: Duration,
}

impl AdbDeviceDriver {
    pub fn new(adb: Adb, subprocess: SubprocessManager, target: TargetApp) -> Self {
        Self {
            adb,
            subprocess,
            target,
            reset_method: ResetMethod::default(),
            storage_dir: "/sdcard/ui-explorer".to_string(),
            install_settle: Duration::from_millis(300),
        }
    }

    pub fn with_reset_method(mut self, method: ResetMethod) -> Self {
        self.reset_method = method;
        self
    }

    pub fn with_storage_dir(mut self, dir: impl Into<String>) -> Self {
        self.storage_dir = dir.into();
        self
    }

    pub fn with_install_settle(mut self, settle: Duration) -> Self {
        self.install_settle = settle;
        self
    }

    async fn run(&self, command: ProcessCommand) -> Result<()> {
        let line = command.display();
        debug!("Executing: {}", line);
        let output = self.subprocess.runner().run(command).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Error::Device(format!(
                "`{}` failed with {:?}: {}",
                line,
                output.status,
                output.stderr.trim()
            )))
        }
    }

    async fn force_stop(&self) -> Result<()> {
        self.run(self.adb.shell(["am", "force-stop", self.target.package.as_str()]).build())
            .await
    }

    async fn clear_app_data(&self) -> Result<()> {
        self.run(self.adb.shell(["pm", "clear", self.target.package.as_str()]).build())
            .await
    }

    async fn uninstall(&self) -> Result<()> {
        self.run(self.adb.command(["uninstall", self.target.package.as_str()]).build())
            .await
    }

    async fn install(&self) -> Result<()> {
        let apk = self.target.apk.as_ref().ok_or_else(|| {
            Error::Config(format!(
                "reset method 'uninstall' needs an APK for {}",
                self.target.package
            ))
        })?;
        let apk = apk.to_string_lossy();
        self.run(self.adb.command(["install", "-r", "-g", apk.as_ref()]).build())
            .await
    }

    async fn prepare_storage(&self) -> Result<()> {
        self.run(self.adb.shell(["mkdir", "-p", self.storage_dir.as_str()]).build())
            .await
    }
}

#[async_trait]
impl DeviceDriver for AdbDeviceDriver {
    async fn reset_app(&self) -> Result<()> {
        info!("Resetting {} ({:?})", self.target.package, self.reset_method);
        match self.reset_method {
            ResetMethod::Uninstall => {
                self.uninstall().await?;
                tokio::time::sleep(self.install_settle).await;
                self.clear_storage().await?;
                self.prepare_storage().await?;
                self.install().await?;
                tokio::time::sleep(self.install_settle).await;
            }
            ResetMethod::ForceStop => {
                self.force_stop().await?;
                self.clear_app_data().await?;
                self.clear_storage().await?;
                self.prepare_storage().await?;
            }
            ResetMethod::ClearData => {
                self.clear_app_data().await?;
                self.clear_storage().await?;
                self.prepare_storage().await?;
            }
        }
        Ok(())
    }

    async fn wake_up_device(&self) -> Result<()> {
        self.run(self.adb.shell(["input", "keyevent", "KEYCODE_WAKEUP"]).build())
            .await?;
        self.run(self.adb.shell(["wm", "dismiss-keyguard"]).build())
            .await
    }

    async fn clear_storage(&self) -> Result<()> {
        self.run(self.adb.shell(["rm", "-rf", self.storage_dir.as_str()]).build())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(method: ResetMethod, apk: Option<&str>) -> (AdbDeviceDriver, crate::subprocess::MockProcessRunner) {
        let (subprocess, mock) = SubprocessManager::mock();
        let target = TargetApp {
            package: "com.example".to_string(),
            apk: apk.map(PathBuf::from),
        };
        let driver = AdbDeviceDriver::new(Adb::new("adb", "dev").unwrap(), subprocess, target)
            .with_reset_method(method)
            .with_storage_dir("/sdcard/test")
            .with_install_settle(Duration::ZERO);
        (driver, mock)
    }

    #[tokio::test]
    async fn test_force_stop_reset() {
        let (driver, mock) = driver(ResetMethod::ForceStop, None);

        driver.reset_app().await.unwrap();

        assert_eq!(
            mock.command_lines(),
            vec![
                "adb -s dev shell am force-stop com.example",
                "adb -s dev shell pm clear com.example",
                "adb -s dev shell rm -rf /sdcard/test",
                "adb -s dev shell mkdir -p /sdcard/test",
            ]
        );
    }

    #[tokio::test]
    async fn test_clear_data_reset_skips_force_stop() {
        let (driver, mock) = driver(ResetMethod::ClearData, None);

        driver.reset_app().await.unwrap();

        let lines = mock.command_lines();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "adb -s dev shell pm clear com.example");
    }

    #[tokio::test]
    async fn test_uninstall_reset_reinstalls() {
        let (driver, mock) = driver(ResetMethod::Uninstall, Some("/apks/app.apk"));

        driver.reset_app().await.unwrap();

        let lines = mock.command_lines();
        assert_eq!(lines.first().unwrap(), "adb -s dev uninstall com.example");
        assert_eq!(lines.last().unwrap(), "adb -s dev install -r -g /apks/app.apk");
    }

    #[tokio::test]
    async fn test_uninstall_reset_without_apk_fails() {
        let (driver, _mock) = driver(ResetMethod::Uninstall, None);

        assert!(matches!(driver.reset_app().await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_failed_command_is_device_error() {
        let (driver, mut mock) = driver(ResetMethod::ForceStop, None);
        mock.expect_command("adb").returns_exit_code(1).finish();

        assert!(matches!(driver.clear_storage().await, Err(Error::Device(_))));
    }

    #[test]
    fn test_reset_method_names() {
        let method: ResetMethod = serde_json::from_str("\"clear-data\"").unwrap();
        assert_eq!(method, ResetMethod::ClearData);
        assert_eq!(ResetMethod::default(), ResetMethod::ForceStop);
    }
}
