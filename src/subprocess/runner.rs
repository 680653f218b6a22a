use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use super::error::ProcessError;

#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
    pub log_file: Option<PathBuf>,
}

impl ProcessCommand {
    /// Command line rendered for logs.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Error(i32),
    Timeout,
    Signal(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Success => Some(0),
            ExitStatus::Error(code) => Some(*code),
            _ => None,
        }
    }
}

/// Handle to a spawned, still-owned child process.
#[async_trait]
pub trait ChildProcess: Send {
    /// OS process id, if the child has not been reaped yet.
    fn id(&self) -> Option<u32>;

    /// True while the process has not exited.
    fn is_alive(&mut self) -> bool;

    /// Forcibly terminate the process and reap it.
    async fn kill(&mut self) -> Result<(), ProcessError>;

    /// Block until the process exits.
    async fn wait(&mut self) -> Result<ExitStatus, ProcessError>;
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run a command to completion.
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError>;

    /// Launch a command and hand back ownership of the running child.
    async fn spawn(&self, command: ProcessCommand) -> Result<Box<dyn ChildProcess>, ProcessError>;
}

pub struct TokioProcessRunner;

impl TokioProcessRunner {
    fn log_command_start(command: &ProcessCommand) {
        tracing::debug!("Executing subprocess: {}", command.display());

        if let Some(ref path) = command.log_file {
            tracing::trace!("Output redirected to {:?}", path);
        }
    }

    fn configure_command(command: &ProcessCommand) -> Result<tokio::process::Command, ProcessError> {
        let mut cmd = tokio::process::Command::new(&command.program);

        // New process group so a kill reaches everything the tool forks
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        cmd.args(&command.args);
        cmd.stdin(Stdio::null());
        Self::configure_stdio(&mut cmd, command)?;
        Ok(cmd)
    }

    fn configure_stdio(
        cmd: &mut tokio::process::Command,
        command: &ProcessCommand,
    ) -> Result<(), ProcessError> {
        match &command.log_file {
            Some(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| ProcessError::LogFile {
                        path: path.display().to_string(),
                        source,
                    })?;
                let err_file = file.try_clone()?;
                cmd.stdout(Stdio::from(file));
                cmd.stderr(Stdio::from(err_file));
            }
            None => {
                cmd.stdout(Stdio::piped());
                cmd.stderr(Stdio::piped());
            }
        }
        Ok(())
    }

    async fn wait_with_timeout(
        child: tokio::process::Child,
        timeout: Option<Duration>,
    ) -> Result<std::process::Output, ProcessError> {
        match timeout {
            Some(duration) => {
                match tokio::time::timeout(duration, child.wait_with_output()).await {
                    Ok(result) => result.map_err(ProcessError::Io),
                    Err(_) => Err(ProcessError::Timeout(duration)),
                }
            }
            None => child.wait_with_output().await.map_err(ProcessError::Io),
        }
    }

    fn parse_exit_status(status: std::process::ExitStatus) -> ExitStatus {
        if status.success() {
            ExitStatus::Success
        } else if let Some(code) = status.code() {
            ExitStatus::Error(code)
        } else {
            Self::parse_signal_status(status)
        }
    }

    #[cfg(unix)]
    fn parse_signal_status(status: std::process::ExitStatus) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            ExitStatus::Signal(signal)
        } else {
            ExitStatus::Error(1)
        }
    }

    #[cfg(not(unix))]
    fn parse_signal_status(_status: std::process::ExitStatus) -> ExitStatus {
        ExitStatus::Error(1)
    }

    fn log_result(result: &ProcessOutput, command: &ProcessCommand) {
        let command_str = command.display();

        match &result.status {
            ExitStatus::Success => {
                tracing::debug!(
                    "Subprocess completed successfully in {:?}: {}",
                    result.duration,
                    command_str
                );
            }
            ExitStatus::Error(code) => {
                tracing::debug!(
                    "Subprocess failed with exit code {} in {:?}: {}",
                    code,
                    result.duration,
                    command_str
                );
                if !result.stderr.is_empty() {
                    tracing::trace!("Stderr: {}", result.stderr);
                }
            }
            ExitStatus::Signal(signal) => {
                tracing::warn!(
                    "Subprocess terminated by signal {} in {:?}: {}",
                    signal,
                    result.duration,
                    command_str
                );
            }
            ExitStatus::Timeout => {
                tracing::warn!(
                    "Subprocess timed out after {:?}: {}",
                    result.duration,
                    command_str
                );
            }
        }
    }

    fn map_spawn_error(error: std::io::Error, command: &ProcessCommand) -> ProcessError {
        if error.kind() == std::io::ErrorKind::NotFound {
            ProcessError::CommandNotFound(command.program.clone())
        } else {
            ProcessError::SpawnFailed {
                command: command.display(),
                source: error,
            }
        }
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        let start = std::time::Instant::now();
        Self::log_command_start(&command);

        let mut cmd = Self::configure_command(&command)?;
        let child = cmd
            .spawn()
            .map_err(|e| Self::map_spawn_error(e, &command))?;

        let output = Self::wait_with_timeout(child, command.timeout).await?;

        let result = ProcessOutput {
            status: Self::parse_exit_status(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration: start.elapsed(),
        };
        Self::log_result(&result, &command);

        Ok(result)
    }

    async fn spawn(&self, command: ProcessCommand) -> Result<Box<dyn ChildProcess>, ProcessError> {
        Self::log_command_start(&command);

        let mut cmd = Self::configure_command(&command)?;
        cmd.kill_on_drop(true);
        let child = cmd
            .spawn()
            .map_err(|e| Self::map_spawn_error(e, &command))?;

        tracing::debug!("Spawned pid {:?}: {}", child.id(), command.display());
        Ok(Box::new(TokioChild { child }))
    }
}

pub struct TokioChild {
    child: tokio::process::Child,
}

#[async_trait]
impl ChildProcess for TokioChild {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn kill(&mut self) -> Result<(), ProcessError> {
        self.child.kill().await.map_err(ProcessError::Io)
    }

    async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        let status = self.child.wait().await.map_err(ProcessError::Io)?;
        Ok(TokioProcessRunner::parse_exit_status(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_joins_args() {
        let command = ProcessCommand {
            program: "adb".to_string(),
            args: vec!["-s".to_string(), "emulator-5554".to_string()],
            timeout: None,
            log_file: None,
        };
        assert_eq!(command.display(), "adb -s emulator-5554");
    }

    #[test]
    fn test_convert_exit_status() {
        use std::os::unix::process::ExitStatusExt;

        let status = std::process::ExitStatus::from_raw(0);
        assert_eq!(
            TokioProcessRunner::parse_exit_status(status),
            ExitStatus::Success
        );

        // Exit code 1
        let status = std::process::ExitStatus::from_raw(256);
        assert_eq!(
            TokioProcessRunner::parse_exit_status(status),
            ExitStatus::Error(1)
        );

        // SIGKILL
        let status = std::process::ExitStatus::from_raw(9);
        assert_eq!(
            TokioProcessRunner::parse_exit_status(status),
            ExitStatus::Signal(9)
        );
    }

    #[test]
    fn test_exit_status_code() {
        assert_eq!(ExitStatus::Success.code(), Some(0));
        assert_eq!(ExitStatus::Error(3).code(), Some(3));
        assert_eq!(ExitStatus::Timeout.code(), None);
        assert!(!ExitStatus::Signal(9).success());
    }
}
