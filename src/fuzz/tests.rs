use super::*;
use crate::adb::Adb;
use crate::subprocess::{ExitStatus, MockProcessRunner, ProcessRunner};
use crate::testing::fake_fuzz_tool::{closed_port, FakeFuzzTool};
use crate::transport::{Connector, RetryPolicy, TcpConnector};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const PACKAGE: &str = "com.example.app";

fn session(mock: &MockProcessRunner) -> FuzzToolSession {
    let adb = Adb::new("adb", "emulator-5554").unwrap();
    let runner = Arc::new(mock.clone()) as Arc<dyn ProcessRunner>;
    let connector = Arc::new(TcpConnector) as Arc<dyn Connector>;
    FuzzToolSession::new(adb, runner, connector)
        .with_retry(RetryPolicy::new(3, Duration::ZERO))
}

fn log_path() -> PathBuf {
    PathBuf::from("/tmp/ui-explorer-test/monkey0")
}

async fn tool_exiting_on_quit(mock: &MockProcessRunner) -> FakeFuzzTool {
    let mock = mock.clone();
    FakeFuzzTool::bind_with_quit_hook(move || {
        if let Some(child) = mock.last_child() {
            child.exit();
        }
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_start_forwards_kills_spawns_and_checks_liveness() {
    let mock = MockProcessRunner::new();
    let tool = FakeFuzzTool::bind().await.unwrap();
    let port = tool.port();
    let mut fuzz = session(&mock);

    fuzz.start(PACKAGE, &log_path(), port).await.unwrap();

    assert!(fuzz.is_running());
    assert!(fuzz.has_connection());
    assert_eq!(fuzz.port(), Some(port));
    assert_eq!(tool.received(), vec!["listvar"]);
    assert_eq!(
        mock.command_lines(),
        vec![
            format!("adb -s emulator-5554 forward tcp:{port} tcp:{port}"),
            "adb -s emulator-5554 shell pkill -9 -f com.android.commands.monkey".to_string(),
        ]
    );

    let spawned = mock.spawned();
    assert_eq!(spawned.len(), 1);
    assert_eq!(
        spawned[0].0.display(),
        format!("adb -s emulator-5554 shell monkey -v -p {PACKAGE} --port {port}")
    );
    assert_eq!(spawned[0].0.log_file, Some(log_path()));
}

#[tokio::test]
async fn test_start_is_idempotent_while_running() {
    let mock = MockProcessRunner::new();
    let tool = FakeFuzzTool::bind().await.unwrap();
    let mut fuzz = session(&mock);

    fuzz.start(PACKAGE, &log_path(), tool.port()).await.unwrap();
    fuzz.start(PACKAGE, &log_path(), tool.port()).await.unwrap();

    assert_eq!(mock.spawned().len(), 1);
    assert_eq!(tool.connection_count(), 1);
    assert_eq!(mock.command_lines().len(), 2);
}

#[tokio::test]
async fn test_start_gives_up_after_retry_budget() {
    let mock = MockProcessRunner::new();
    let port = closed_port().await.unwrap();
    let mut fuzz = session(&mock);

    let result = fuzz.start(PACKAGE, &log_path(), port).await;

    match result {
        Err(FuzzToolError::ConnectFailed { port: p, attempts }) => {
            assert_eq!(p, port);
            assert_eq!(attempts, 3);
        }
        other => panic!("expected ConnectFailed, got {other:?}"),
    }
    assert!(!fuzz.is_running());
    assert!(!fuzz.has_connection());
    assert_eq!(fuzz.port(), None);
    assert!(mock.last_child().unwrap().was_killed());
    assert_eq!(
        mock.command_lines().last().unwrap(),
        &format!("adb -s emulator-5554 forward --remove tcp:{port}")
    );
}

#[tokio::test]
async fn test_spawn_failure_removes_forward() {
    let mock = MockProcessRunner::new();
    mock.fail_next_spawns(1);
    let mut fuzz = session(&mock);

    let result = fuzz.start(PACKAGE, &log_path(), 7011).await;

    assert!(matches!(result, Err(FuzzToolError::Process(_))));
    assert_eq!(fuzz.port(), None);
    assert_eq!(
        mock.command_lines().last().unwrap(),
        "adb -s emulator-5554 forward --remove tcp:7011"
    );
}

#[tokio::test]
async fn test_send_command_returns_reply() {
    let mock = MockProcessRunner::new();
    let tool = FakeFuzzTool::bind().await.unwrap();
    let mut fuzz = session(&mock);
    fuzz.start(PACKAGE, &log_path(), tool.port()).await.unwrap();

    let reply = fuzz.send_command("touch down 10 20").await;

    assert_eq!(reply.as_deref(), Some("OK"));
    assert_eq!(tool.received(), vec!["listvar", "touch down 10 20"]);
}

#[tokio::test]
async fn test_send_command_without_session_is_absent() {
    let mock = MockProcessRunner::new();
    let mut fuzz = session(&mock);

    assert_eq!(fuzz.send_command("listvar").await, None);
    fuzz.send_command_no_reply("tap 1 1").await;
    assert!(mock.command_lines().is_empty());
}

#[tokio::test]
async fn test_send_command_after_process_exit_is_absent() {
    let mock = MockProcessRunner::new();
    let tool = FakeFuzzTool::bind().await.unwrap();
    let mut fuzz = session(&mock);
    fuzz.start(PACKAGE, &log_path(), tool.port()).await.unwrap();

    mock.last_child().unwrap().exit();

    assert!(!fuzz.is_running());
    assert_eq!(fuzz.send_command("listvar").await, None);
    assert_eq!(tool.received(), vec!["listvar"]);
}

#[tokio::test]
async fn test_start_after_exit_relaunches() {
    let mock = MockProcessRunner::new();
    let tool = FakeFuzzTool::bind().await.unwrap();
    let mut fuzz = session(&mock);
    fuzz.start(PACKAGE, &log_path(), tool.port()).await.unwrap();
    mock.last_child().unwrap().exit();

    fuzz.start(PACKAGE, &log_path(), tool.port()).await.unwrap();

    assert!(fuzz.is_running());
    assert_eq!(mock.spawned().len(), 2);
    assert_eq!(tool.connection_count(), 2);
}

#[tokio::test]
async fn test_batch_sends_script_then_quit_and_tears_down() {
    let mock = MockProcessRunner::new();
    let tool = tool_exiting_on_quit(&mock).await;
    let port = tool.port();
    let mut fuzz = session(&mock);
    fuzz.start(PACKAGE, &log_path(), port).await.unwrap();

    let status = fuzz
        .send_batch_and_wait("tap 100 200\n\npress BACK\n")
        .await
        .unwrap();

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(
        tool.received(),
        vec!["listvar", "tap 100 200", "press BACK", "quit"]
    );
    assert!(!fuzz.is_running());
    assert_eq!(fuzz.port(), None);

    let lines = mock.command_lines();
    assert_eq!(
        &lines[lines.len() - 2..],
        &[
            "adb -s emulator-5554 shell pkill -9 -f com.android.commands.monkey".to_string(),
            format!("adb -s emulator-5554 forward --remove tcp:{port}"),
        ]
    );
}

#[tokio::test]
async fn test_batch_trims_lines_and_skips_blank_ones() {
    let mock = MockProcessRunner::new();
    let tool = tool_exiting_on_quit(&mock).await;
    let mut fuzz = session(&mock);
    fuzz.start(PACKAGE, &log_path(), tool.port()).await.unwrap();

    fuzz.send_batch_and_wait("tap 1 2  \r\n   \n\npress BACK\t")
        .await
        .unwrap();

    assert_eq!(
        tool.received(),
        vec!["listvar", "tap 1 2", "press BACK", "quit"]
    );
}

#[tokio::test]
async fn test_batch_with_empty_script_still_quits() {
    let mock = MockProcessRunner::new();
    let tool = tool_exiting_on_quit(&mock).await;
    let mut fuzz = session(&mock);
    fuzz.start(PACKAGE, &log_path(), tool.port()).await.unwrap();

    fuzz.send_batch_and_wait("").await.unwrap();

    assert_eq!(tool.received(), vec!["listvar", "quit"]);
}

#[tokio::test]
async fn test_batch_without_session_fails() {
    let mock = MockProcessRunner::new();
    let mut fuzz = session(&mock);

    let result = fuzz.send_batch_and_wait("tap 1 1").await;

    assert!(matches!(result, Err(FuzzToolError::NotRunning)));
}

#[tokio::test]
async fn test_stop_kills_process_and_is_repeatable() {
    let mock = MockProcessRunner::new();
    let tool = FakeFuzzTool::bind().await.unwrap();
    let mut fuzz = session(&mock);
    fuzz.start(PACKAGE, &log_path(), tool.port()).await.unwrap();

    fuzz.stop().await;
    let after_first = mock.command_lines().len();
    fuzz.stop().await;

    assert!(mock.last_child().unwrap().was_killed());
    assert!(!fuzz.is_running());
    assert_eq!(after_first, 4);
    assert_eq!(mock.command_lines().len(), after_first);
}

#[tokio::test]
async fn test_untimed_burst_command_and_seeds() {
    let mock = MockProcessRunner::new();
    let mut fuzz = session(&mock);
    let log = PathBuf::from("/tmp/ui-explorer-test/monkeyC3");

    let first = fuzz.run_untimed_burst(5000, PACKAGE, &log).await.unwrap();
    fuzz.run_untimed_burst(30, PACKAGE, &log).await.unwrap();

    assert_eq!(first, ExitStatus::Success);
    let history = mock.get_call_history();
    assert_eq!(
        history[0].display(),
        format!("adb -s emulator-5554 shell monkey -p {PACKAGE} --throttle 10 -s 0 -v 500")
    );
    assert_eq!(
        history[1].display(),
        format!("adb -s emulator-5554 shell monkey -p {PACKAGE} --throttle 10 -s 1 -v 3")
    );
    assert_eq!(history[0].log_file, Some(log));
    assert!(mock.spawned().is_empty());
}

#[tokio::test]
async fn test_untimed_burst_custom_throttle() {
    let mock = MockProcessRunner::new();
    let mut fuzz = session(&mock)
        .with_throttle_ms(50)
        .with_seeds(SeedCounter::starting_at(41));

    fuzz.run_untimed_burst(1000, PACKAGE, &log_path())
        .await
        .unwrap();

    assert_eq!(
        mock.command_lines(),
        vec![format!(
            "adb -s emulator-5554 shell monkey -p {PACKAGE} --throttle 50 -s 41 -v 20"
        )]
    );
}
