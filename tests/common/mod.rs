//! Common test utilities and helpers

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use ui_explorer::config::{ExplorerConfig, Pacing};
use ui_explorer::device::DeviceSnapshot;
use ui_explorer::transport::LOCALHOST;

pub const TARGET: &str = "com.example.notes";

/// Configuration for a session against local doubles: no pacing delays and
/// a single quick fuzz tool connection attempt.
pub fn test_config(output_dir: &std::path::Path, iterations: usize) -> ExplorerConfig {
    let mut config = ExplorerConfig::default();
    config.target.package = TARGET.to_string();
    config.stop.iterations = iterations;
    config.pacing = Pacing::immediate();
    config.fuzz.connect_attempts = 1;
    config.fuzz.connect_pause = std::time::Duration::ZERO;
    config.output_dir = output_dir.to_path_buf();
    config
}

/// Device bridge speaking the line protocol over a local TCP port.
///
/// `data` is answered with the scripted snapshots in order, repeating the
/// last one; `timing` with an empty list; everything else with `ok`.
pub struct FakeBridgeServer {
    port: u16,
    requests: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl FakeBridgeServer {
    pub async fn serve(snapshots: Vec<DeviceSnapshot>) -> std::io::Result<Self> {
        let listener = TcpListener::bind((LOCALHOST, 0)).await?;
        let port = listener.local_addr()?.port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let script = Arc::new(Mutex::new(snapshots));

        let task = {
            let requests = Arc::clone(&requests);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let (read_half, mut write_half) = stream.into_split();
                    let mut lines = BufReader::new(read_half).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let reply = match line.as_str() {
                            "data" => next_snapshot(&script),
                            "timing" => "[]".to_string(),
                            _ => "ok".to_string(),
                        };
                        requests.lock().unwrap().push(line);
                        if write_half
                            .write_all(format!("{reply}\n").as_bytes())
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            })
        };

        Ok(Self {
            port,
            requests,
            task,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for FakeBridgeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn next_snapshot(script: &Mutex<Vec<DeviceSnapshot>>) -> String {
    let mut script = script.lock().unwrap();
    let snapshot = if script.len() > 1 {
        script.remove(0)
    } else {
        script.first().cloned().unwrap_or_default()
    };
    serde_json::to_string(&snapshot).unwrap()
}
