use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::snapshot::DeviceSnapshot;
use crate::adb::Adb;
use crate::error::{Error, Result};
use crate::subprocess::ProcessRunner;
use crate::transport::{Connector, LineChannel, RetryPolicy};

/// Pause between connection attempts while the bridge comes up.
pub const BRIDGE_CONNECT_PAUSE: Duration = Duration::from_millis(500);

pub const DATA_REQUEST: &str = "data";
pub const TIMING_REQUEST: &str = "timing";

/// The on-device automation bridge.
#[async_trait]
pub trait DeviceBridge: Send {
    /// Connect, waiting up to `timeout` for the bridge to accept.
    async fn start(&mut self, timeout: Duration, port: u16) -> Result<()>;

    async fn stop(&mut self) -> Result<()>;

    /// Perform one interaction or control command (`wait`, `nop`, `launch:..`).
    async fn send_event(&mut self, command: &str) -> Result<()>;

    async fn send_heartbeat(&mut self, iteration: usize) -> Result<()>;

    async fn get_data(&mut self) -> Result<DeviceSnapshot>;

    /// Profiling entries of the form `key:value`.
    async fn get_timing(&mut self) -> Result<Vec<String>>;
}

/// Line-protocol client for a bridge listening behind an adb-forwarded port.
///
/// Every request is one line and gets exactly one reply line: an ack for
/// events and heartbeats, JSON for `data` and `timing`.
pub struct SocketBridge {
    connector: Arc<dyn Connector>,
    forwarding: Option<(Adb, Arc<dyn ProcessRunner>)>,
    connect_pause: Duration,
    channel: Option<Box<dyn LineChannel>>,
    forwarded_port: Option<u16>,
}

impl SocketBridge {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            forwarding: None,
            connect_pause: BRIDGE_CONNECT_PAUSE,
            channel: None,
            forwarded_port: None,
        }
    }

    /// Set up `adb forward` for the port on start and remove it on stop.
    pub fn with_port_forwarding(mut self, adb: Adb, runner: Arc<dyn ProcessRunner>) -> Self {
        self.forwarding = Some((adb, runner));
        self
    }

    pub fn with_connect_pause(mut self, pause: Duration) -> Self {
        self.connect_pause = pause;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    async fn request(&mut self, line: &str) -> Result<String> {
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| Error::Bridge("bridge is not connected".to_string()))?;

        debug!("Bridge request: {}", line);
        channel.send_line(line).await?;
        match channel.read_line().await? {
            Some(reply) => Ok(reply),
            None => Err(Error::Bridge(format!(
                "bridge closed the connection while answering {line:?}"
            ))),
        }
    }
}

#[async_trait]
impl DeviceBridge for SocketBridge {
    async fn start(&mut self, timeout: Duration, port: u16) -> Result<()> {
        if self.channel.is_some() {
            self.stop().await?;
        }

        if let Some((adb, runner)) = &self.forwarding {
            runner.run(adb.forward(port)).await?;
            self.forwarded_port = Some(port);
        }

        let connector = Arc::clone(&self.connector);
        let retry = RetryPolicy::spanning(timeout, self.connect_pause);
        let channel = retry
            .run(|attempt| {
                let connector = Arc::clone(&connector);
                async move {
                    match connector.connect(port).await {
                        Ok(channel) => Some(channel),
                        Err(e) => {
                            debug!("Bridge not ready on port {} (attempt {}): {}", port, attempt, e);
                            None
                        }
                    }
                }
            })
            .await;

        match channel {
            Some(channel) => {
                info!("Device bridge connected on port {}", port);
                self.channel = Some(channel);
                Ok(())
            }
            None => Err(Error::Bridge(format!(
                "bridge did not accept on port {} within {:?}",
                port, timeout
            ))),
        }
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(mut channel) = self.channel.take() {
            if let Err(e) = channel.close().await {
                debug!("Ignoring bridge close error: {}", e);
            }
        }

        if let (Some(port), Some((adb, runner))) = (self.forwarded_port.take(), &self.forwarding) {
            if let Err(e) = runner.run(adb.remove_forward(port)).await {
                warn!("Failed to remove bridge forwarding for port {}: {}", port, e);
            }
        }
        Ok(())
    }

    async fn send_event(&mut self, command: &str) -> Result<()> {
        self.request(command).await.map(|_| ())
    }

    async fn send_heartbeat(&mut self, iteration: usize) -> Result<()> {
        self.request(&format!("heartbeat:{iteration}")).await.map(|_| ())
    }

    async fn get_data(&mut self) -> Result<DeviceSnapshot> {
        let reply = self.request(DATA_REQUEST).await?;
        Ok(serde_json::from_str(&reply)?)
    }

    async fn get_timing(&mut self) -> Result<Vec<String>> {
        let reply = self.request(TIMING_REQUEST).await?;
        Ok(serde_json::from_str(&reply)?)
    }
}
