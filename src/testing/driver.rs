use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::device::DeviceDriver;
use crate::error::{Error, Result};

#[derive(Default)]
struct DriverLog {
    resets: usize,
    wake_ups: usize,
    storage_clears: usize,
    fail_storage_clear: bool,
}

/// Driver that only counts what it was asked to do.
#[derive(Clone, Default)]
pub struct RecordingDriver {
    log: Arc<Mutex<DriverLog>>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_storage_clear(&self) {
        self.log.lock().unwrap().fail_storage_clear = true;
    }

    pub fn resets(&self) -> usize {
        self.log.lock().unwrap().resets
    }

    pub fn wake_ups(&self) -> usize {
        self.log.lock().unwrap().wake_ups
    }

    pub fn storage_clears(&self) -> usize {
        self.log.lock().unwrap().storage_clears
    }
}

#[async_trait]
impl DeviceDriver for RecordingDriver {
    async fn reset_app(&self) -> Result<()> {
        self.log.lock().unwrap().resets += 1;
        Ok(())
    }

    async fn wake_up_device(&self) -> Result<()> {
        self.log.lock().unwrap().wake_ups += 1;
        Ok(())
    }

    async fn clear_storage(&self) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        log.storage_clears += 1;
        if log.fail_storage_clear {
            return Err(Error::Device("storage is read-only".to_string()));
        }
        Ok(())
    }
}
