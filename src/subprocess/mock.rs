use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use super::error::ProcessError;
use super::runner::{ChildProcess, ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner};

#[derive(Clone)]
pub struct MockProcessRunner {
    expectations: Arc<Mutex<Vec<MockExpectation>>>,
    call_history: Arc<Mutex<Vec<ProcessCommand>>>,
    spawn_history: Arc<Mutex<Vec<(ProcessCommand, MockChildControl)>>>,
    spawn_failures: Arc<Mutex<usize>>,
}

struct MockExpectation {
    program: String,
    #[allow(clippy::type_complexity)]
    args_matcher: Option<Box<dyn Fn(&[String]) -> bool + Send + Sync>>,
    response: ProcessOutput,
    times_called: usize,
    expected_times: Option<usize>,
}

pub struct MockCommandConfig {
    runner: MockProcessRunner,
    expectation: MockExpectation,
}

impl MockProcessRunner {
    pub fn new() -> Self {
        Self {
            expectations: Arc::new(Mutex::new(Vec::new())),
            call_history: Arc::new(Mutex::new(Vec::new())),
            spawn_history: Arc::new(Mutex::new(Vec::new())),
            spawn_failures: Arc::new(Mutex::new(0)),
        }
    }

    pub fn expect_command(&mut self, program: &str) -> MockCommandConfig {
        MockCommandConfig {
            runner: self.clone(),
            expectation: MockExpectation {
                program: program.to_string(),
                args_matcher: None,
                response: ProcessOutput {
                    status: ExitStatus::Success,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration: Duration::from_millis(10),
                },
                times_called: 0,
                expected_times: None,
            },
        }
    }

    /// Make the next `n` calls to `spawn` fail.
    pub fn fail_next_spawns(&self, n: usize) {
        *self.spawn_failures.lock().unwrap() = n;
    }

    pub fn verify_called(&self, program: &str, times: usize) -> bool {
        let history = self.call_history.lock().unwrap();
        let count = history.iter().filter(|cmd| cmd.program == program).count();
        count == times
    }

    pub fn get_call_history(&self) -> Vec<ProcessCommand> {
        self.call_history.lock().unwrap().clone()
    }

    /// Command lines of every `run` call, in order.
    pub fn command_lines(&self) -> Vec<String> {
        self.get_call_history().iter().map(|c| c.display()).collect()
    }

    pub fn spawned(&self) -> Vec<(ProcessCommand, MockChildControl)> {
        self.spawn_history.lock().unwrap().clone()
    }

    /// Control handle of the most recently spawned child.
    pub fn last_child(&self) -> Option<MockChildControl> {
        self.spawn_history
            .lock()
            .unwrap()
            .last()
            .map(|(_, control)| control.clone())
    }

    pub fn reset(&mut self) {
        self.expectations.lock().unwrap().clear();
        self.call_history.lock().unwrap().clear();
        self.spawn_history.lock().unwrap().clear();
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        self.call_history.lock().unwrap().push(command.clone());

        let mut expectations = self.expectations.lock().unwrap();

        // Unconfigured commands succeed silently; adb plumbing emits many of them.
        if expectations.is_empty() {
            return Ok(ProcessOutput {
                status: ExitStatus::Success,
                stdout: String::new(),
                stderr: String::new(),
                duration: Duration::from_millis(1),
            });
        }

        for expectation in expectations.iter_mut() {
            if expectation.program != command.program {
                continue;
            }

            if let Some(ref args_matcher) = expectation.args_matcher {
                if !(args_matcher)(&command.args) {
                    continue;
                }
            }

            expectation.times_called += 1;

            if let Some(expected) = expectation.expected_times {
                if expectation.times_called > expected {
                    return Err(ProcessError::MockExpectationNotMet(format!(
                        "Command '{}' called {} times, expected {}",
                        command.program, expectation.times_called, expected
                    )));
                }
            }

            return Ok(expectation.response.clone());
        }

        Err(ProcessError::MockExpectationNotMet(format!(
            "No expectation found for command: {} {:?}",
            command.program, command.args
        )))
    }

    async fn spawn(&self, command: ProcessCommand) -> Result<Box<dyn ChildProcess>, ProcessError> {
        {
            let mut failures = self.spawn_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(ProcessError::CommandNotFound(command.program.clone()));
            }
        }

        let control = MockChildControl::new();
        self.spawn_history
            .lock()
            .unwrap()
            .push((command, control.clone()));
        Ok(Box::new(MockChild { control }))
    }
}

impl MockCommandConfig {
    pub fn with_args<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&[String]) -> bool + Send + Sync + 'static,
    {
        self.expectation.args_matcher = Some(Box::new(matcher));
        self
    }

    pub fn returns_stdout(mut self, stdout: &str) -> Self {
        self.expectation.response.stdout = stdout.to_string();
        self
    }

    pub fn returns_exit_code(mut self, code: i32) -> Self {
        self.expectation.response.status = if code == 0 {
            ExitStatus::Success
        } else {
            ExitStatus::Error(code)
        };
        self
    }

    pub fn returns_success(mut self) -> Self {
        self.expectation.response.status = ExitStatus::Success;
        self
    }

    pub fn times(mut self, n: usize) -> Self {
        self.expectation.expected_times = Some(n);
        self
    }

    pub fn finish(self) {
        self.runner
            .expectations
            .lock()
            .unwrap()
            .push(self.expectation);
    }
}

impl Default for MockProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Test-side handle for a child produced by [`MockProcessRunner::spawn`].
///
/// The child stays alive until the test calls [`MockChildControl::exit`] or
/// the code under test kills it.
#[derive(Clone)]
pub struct MockChildControl {
    alive: Arc<watch::Sender<bool>>,
    killed: Arc<AtomicBool>,
}

impl MockChildControl {
    fn new() -> Self {
        let (alive, _) = watch::channel(true);
        Self {
            alive: Arc::new(alive),
            killed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Simulate the process exiting on its own.
    pub fn exit(&self) {
        self.alive.send_replace(false);
    }

    pub fn is_alive(&self) -> bool {
        *self.alive.borrow()
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

struct MockChild {
    control: MockChildControl,
}

#[async_trait]
impl ChildProcess for MockChild {
    fn id(&self) -> Option<u32> {
        self.control.is_alive().then_some(4242)
    }

    fn is_alive(&mut self) -> bool {
        self.control.is_alive()
    }

    async fn kill(&mut self) -> Result<(), ProcessError> {
        self.control.killed.store(true, Ordering::SeqCst);
        self.control.exit();
        Ok(())
    }

    async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        let mut rx = self.control.alive.subscribe();
        // The sender lives inside the control, so the channel cannot close here.
        let _ = rx.wait_for(|alive| !*alive).await;
        if self.control.was_killed() {
            Ok(ExitStatus::Signal(9))
        } else {
            Ok(ExitStatus::Success)
        }
    }
}
