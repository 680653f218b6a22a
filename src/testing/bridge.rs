use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::device::{DeviceBridge, DeviceSnapshot};
use crate::error::{Error, Result};

#[derive(Default)]
struct BridgeScript {
    snapshots: VecDeque<DeviceSnapshot>,
    timing: VecDeque<Vec<String>>,
    fail_timing: bool,
    connected: bool,
    starts: Vec<u16>,
    stops: usize,
    events: Vec<String>,
    heartbeats: Vec<usize>,
    data_requests: usize,
}

/// Bridge that replays queued snapshots.
///
/// The last snapshot repeats once the queue is down to one entry.
#[derive(Clone, Default)]
pub struct ScriptedBridge {
    script: Arc<Mutex<BridgeScript>>,
}

impl ScriptedBridge {
    pub fn new<I>(snapshots: I) -> Self
    where
        I: IntoIterator<Item = DeviceSnapshot>,
    {
        let bridge = Self::default();
        bridge.script.lock().unwrap().snapshots = snapshots.into_iter().collect();
        bridge
    }

    /// Queue the reply of the next `timing` request. Later requests get
    /// nothing once the queue is empty.
    pub fn push_timing<I, S>(&self, entries: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script
            .lock()
            .unwrap()
            .timing
            .push_back(entries.into_iter().map(Into::into).collect());
    }

    pub fn fail_timing(&self) {
        self.script.lock().unwrap().fail_timing = true;
    }

    pub fn events(&self) -> Vec<String> {
        self.script.lock().unwrap().events.clone()
    }

    pub fn heartbeats(&self) -> Vec<usize> {
        self.script.lock().unwrap().heartbeats.clone()
    }

    pub fn starts(&self) -> Vec<u16> {
        self.script.lock().unwrap().starts.clone()
    }

    pub fn stops(&self) -> usize {
        self.script.lock().unwrap().stops
    }

    pub fn data_requests(&self) -> usize {
        self.script.lock().unwrap().data_requests
    }

    pub fn is_connected(&self) -> bool {
        self.script.lock().unwrap().connected
    }
}

#[async_trait]
impl DeviceBridge for ScriptedBridge {
    async fn start(&mut self, _timeout: Duration, port: u16) -> Result<()> {
        let mut script = self.script.lock().unwrap();
        script.starts.push(port);
        script.connected = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let mut script = self.script.lock().unwrap();
        script.stops += 1;
        script.connected = false;
        Ok(())
    }

    async fn send_event(&mut self, command: &str) -> Result<()> {
        let mut script = self.script.lock().unwrap();
        if !script.connected {
            return Err(Error::Bridge(format!("not connected, dropped {command:?}")));
        }
        script.events.push(command.to_string());
        Ok(())
    }

    async fn send_heartbeat(&mut self, iteration: usize) -> Result<()> {
        self.script.lock().unwrap().heartbeats.push(iteration);
        Ok(())
    }

    async fn get_data(&mut self) -> Result<DeviceSnapshot> {
        let mut script = self.script.lock().unwrap();
        script.data_requests += 1;
        if script.snapshots.len() > 1 {
            if let Some(snapshot) = script.snapshots.pop_front() {
                return Ok(snapshot);
            }
        }
        script
            .snapshots
            .front()
            .cloned()
            .ok_or_else(|| Error::Bridge("no snapshot scripted".to_string()))
    }

    async fn get_timing(&mut self) -> Result<Vec<String>> {
        let mut script = self.script.lock().unwrap();
        if script.fail_timing {
            return Err(Error::Bridge("timing unavailable".to_string()));
        }
        Ok(script.timing.pop_front().unwrap_or_default())
    }
}
