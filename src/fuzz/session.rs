use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::error::FuzzToolError;
use super::seed::SeedCounter;
use super::{
    BURST_THROTTLE_MS, DEFAULT_CONNECT_RETRY, FUZZ_TOOL, FUZZ_TOOL_PROCESS, LIVENESS_COMMAND,
    QUIT_COMMAND,
};
use crate::adb::Adb;
use crate::subprocess::{ChildProcess, ExitStatus, ProcessRunner};
use crate::transport::{Connector, LineChannel, RetryPolicy};

/// Owner of the fuzz tool's process and its control socket.
///
/// At most one process and one connection exist at a time. After `start`
/// returns, either both are present or neither is.
pub struct FuzzToolSession {
    adb: Adb,
    runner: Arc<dyn ProcessRunner>,
    connector: Arc<dyn Connector>,
    retry: RetryPolicy,
    throttle_ms: u64,
    process: Option<Box<dyn ChildProcess>>,
    channel: Option<Box<dyn LineChannel>>,
    forwarded_port: Option<u16>,
    seeds: SeedCounter,
}

impl FuzzToolSession {
    pub fn new(adb: Adb, runner: Arc<dyn ProcessRunner>, connector: Arc<dyn Connector>) -> Self {
        Self {
            adb,
            runner,
            connector,
            retry: DEFAULT_CONNECT_RETRY,
            throttle_ms: BURST_THROTTLE_MS,
            process: None,
            channel: None,
            forwarded_port: None,
            seeds: SeedCounter::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_throttle_ms(mut self, throttle_ms: u64) -> Self {
        self.throttle_ms = throttle_ms.max(1);
        self
    }

    pub fn with_seeds(mut self, seeds: SeedCounter) -> Self {
        self.seeds = seeds;
        self
    }

    pub fn is_running(&mut self) -> bool {
        self.process.as_mut().is_some_and(|p| p.is_alive())
    }

    pub fn has_connection(&self) -> bool {
        self.channel.is_some()
    }

    pub fn port(&self) -> Option<u16> {
        self.forwarded_port
    }

    /// Launch the tool against `package`, listening on `port`.
    ///
    /// Does nothing when a session is already running. On connection
    /// failure everything set up so far is torn down again.
    pub async fn start(
        &mut self,
        package: &str,
        log_path: &Path,
        port: u16,
    ) -> Result<(), FuzzToolError> {
        if self.is_running() {
            debug!("Fuzz tool already running on port {:?}", self.forwarded_port);
            return Ok(());
        }

        // A previous process may have exited on its own; drop what it left.
        self.stop().await;

        self.run_quietly("forward", self.adb.forward(port)).await;
        self.forwarded_port = Some(port);

        self.run_quietly("force kill", self.adb.force_kill(FUZZ_TOOL_PROCESS))
            .await;

        let port_arg = port.to_string();
        let launch = self
            .adb
            .shell([FUZZ_TOOL, "-v", "-p", package, "--port", port_arg.as_str()])
            .log_file(log_path)
            .build();

        match self.runner.spawn(launch).await {
            Ok(child) => self.process = Some(child),
            Err(e) => {
                warn!("Failed to launch fuzz tool: {}", e);
                self.stop().await;
                return Err(e.into());
            }
        }

        match self.connect(port).await {
            Some(channel) => {
                info!("Fuzz tool connected on port {}", port);
                self.channel = Some(channel);
                Ok(())
            }
            None => {
                warn!("CANNOT START FUZZ TOOL CORRECTLY (port {})", port);
                self.stop().await;
                Err(FuzzToolError::ConnectFailed {
                    port,
                    attempts: self.retry.attempts,
                })
            }
        }
    }

    async fn connect(&self, port: u16) -> Option<Box<dyn LineChannel>> {
        let connector = Arc::clone(&self.connector);

        self.retry
            .run(|attempt| {
                let connector = Arc::clone(&connector);
                async move {
                    let mut channel = match connector.connect(port).await {
                        Ok(channel) => channel,
                        Err(e) => {
                            warn!(
                                "Cannot connect to fuzz tool using port {} (attempt {}): {}",
                                port, attempt, e
                            );
                            return None;
                        }
                    };

                    match check_liveness(channel.as_mut()).await {
                        Some(reply) => {
                            debug!("Liveness reply: {}", reply);
                            Some(channel)
                        }
                        None => {
                            warn!(
                                "Fuzz tool on port {} did not answer {} (attempt {})",
                                port, LIVENESS_COMMAND, attempt
                            );
                            let _ = channel.close().await;
                            None
                        }
                    }
                }
            })
            .await
    }

    /// Send one command and wait for its reply line.
    ///
    /// `None` means no reply: the tool is not running or the socket failed.
    /// The connection is kept either way.
    pub async fn send_command(&mut self, command: &str) -> Option<String> {
        if !self.is_running() {
            return None;
        }
        let channel = self.channel.as_mut()?;

        debug!("Sending to fuzz tool: {}", command);
        if let Err(e) = channel.send_line(command).await {
            warn!("Failed to send {:?} to fuzz tool: {}", command, e);
            return None;
        }

        match channel.read_line().await {
            Ok(Some(reply)) => {
                debug!("Fuzz tool returned: {}", reply);
                Some(reply)
            }
            Ok(None) => {
                warn!("Fuzz tool closed the connection after {:?}", command);
                None
            }
            Err(e) => {
                warn!("Failed to read fuzz tool reply to {:?}: {}", command, e);
                None
            }
        }
    }

    /// Send one command without reading a reply.
    pub async fn send_command_no_reply(&mut self, command: &str) {
        if !self.is_running() {
            return;
        }
        let Some(channel) = self.channel.as_mut() else {
            return;
        };

        debug!("Sending to fuzz tool: {}", command);
        if let Err(e) = channel.send_line(command).await {
            warn!("Failed to send {:?} to fuzz tool: {}", command, e);
        }
    }

    /// Send a newline-separated script followed by `quit`, then block until the
    /// tool exits. The session is torn down afterwards.
    ///
    /// Trailing whitespace is trimmed from each line and blank lines are not sent.
    pub async fn send_batch_and_wait(&mut self, script: &str) -> Result<ExitStatus, FuzzToolError> {
        if !self.is_running() {
            return Err(FuzzToolError::NotRunning);
        }

        let mut sent = 0usize;
        for line in script.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
            self.send_command_no_reply(line).await;
            sent += 1;
        }
        self.send_command_no_reply(QUIT_COMMAND).await;
        info!("Batch commands sent ({} + {})", sent, QUIT_COMMAND);

        let Some(process) = self.process.as_mut() else {
            return Err(FuzzToolError::NotRunning);
        };
        let status = process.wait().await;
        self.stop().await;

        Ok(status?)
    }

    /// Tear the session down: socket, process, device-side instances, then
    /// port forwarding. Every step tolerates the resource already being gone.
    pub async fn stop(&mut self) {
        if self.channel.is_none() && self.process.is_none() && self.forwarded_port.is_none() {
            return;
        }

        if let Some(mut channel) = self.channel.take() {
            if let Err(e) = channel.close().await {
                debug!("Ignoring fuzz tool socket close error: {}", e);
            }
        }

        if let Some(mut process) = self.process.take() {
            if let Err(e) = process.kill().await {
                debug!("Ignoring fuzz tool kill error: {}", e);
            }
        }

        self.run_quietly("force kill", self.adb.force_kill(FUZZ_TOOL_PROCESS))
            .await;

        if let Some(port) = self.forwarded_port.take() {
            self.run_quietly("remove forward", self.adb.remove_forward(port))
                .await;
        }
    }

    /// Run the tool for roughly `duration_ms` without a socket session.
    pub async fn run_untimed_burst(
        &mut self,
        duration_ms: u64,
        package: &str,
        log_path: &Path,
    ) -> Result<ExitStatus, FuzzToolError> {
        let event_count = (duration_ms / self.throttle_ms).to_string();
        let throttle = self.throttle_ms.to_string();
        let seed = self.seeds.next_seed().to_string();

        let command = self
            .adb
            .shell([
                FUZZ_TOOL,
                "-p",
                package,
                "--throttle",
                throttle.as_str(),
                "-s",
                seed.as_str(),
                "-v",
                event_count.as_str(),
            ])
            .log_file(log_path)
            .build();

        info!("Executing shell command: {}", command.display());
        let output = self.runner.run(command).await?;
        info!("Execution finished: {:?}", output.status);
        Ok(output.status)
    }

    async fn run_quietly(&self, what: &str, command: crate::subprocess::ProcessCommand) {
        match self.runner.run(command).await {
            Ok(output) if !output.status.success() => {
                debug!("adb {} exited with {:?}", what, output.status);
            }
            Ok(_) => {}
            Err(e) => warn!("adb {} failed: {}", what, e),
        }
    }
}

async fn check_liveness(channel: &mut dyn LineChannel) -> Option<String> {
    channel.send_line(LIVENESS_COMMAND).await.ok()?;
    channel.read_line().await.ok().flatten()
}
