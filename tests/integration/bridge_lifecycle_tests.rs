//! Integration tests for the worker bridge lifecycle, driven by `/bin/sh`
//! scripts standing in for the real backend worker.
//!
//! Covers the command correlation scenarios end to end: fail-fast with no
//! worker, successful completion, timeout, stderr failure, single-flight
//! rejection, dual delivery to the observer, idempotent stop, and
//! immediate failure of a pending command when the worker exits.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use serial_test::serial;
use tokio::sync::mpsc;

use mvmz_bridge::config::LaunchSpec;
use mvmz_bridge::worker::{BridgeEvent, WorkerBridge};
use mvmz_bridge::BridgeError;

/// Upper bound for any single await in these tests; far below the default
/// five-minute command timeout.
const TEST_DEADLINE: Duration = Duration::from_secs(10);

fn sh_worker(script: &str) -> LaunchSpec {
    LaunchSpec {
        executable: "/bin/sh".into(),
        args: vec!["-c".to_owned(), script.to_owned()],
        working_dir: std::env::temp_dir(),
    }
}

fn bridge(script: &str, timeout: Duration) -> WorkerBridge {
    WorkerBridge::new(sh_worker(script), timeout)
}

async fn send_bounded(bridge: &WorkerBridge, command: serde_json::Value) -> Result<serde_json::Value, BridgeError> {
    tokio::time::timeout(TEST_DEADLINE, bridge.send(command))
        .await
        .expect("send must resolve within the test deadline")
}

// ── Scenario A: no worker ────────────────────────────────────────────────────

/// `send` before `start` fails immediately with `ProcessNotRunning`.
#[tokio::test]
async fn send_without_start_fails_with_process_not_running() {
    let bridge = bridge("true", Duration::from_secs(5));

    let result = bridge.send(json!({"cmd": "ping"})).await;
    assert!(
        matches!(result, Err(BridgeError::ProcessNotRunning)),
        "expected ProcessNotRunning, got: {result:?}"
    );
}

// ── Scenario B: completion ───────────────────────────────────────────────────

/// A worker that answers with a `complete` envelope resolves `send` with
/// the envelope's `data` field, well under the timeout.
#[tokio::test]
async fn command_resolves_with_complete_data() {
    let bridge = bridge(
        r#"read line; printf '{"type":"complete","data":{"ok":true}}\n'; sleep 2"#,
        Duration::from_secs(30),
    );
    bridge.start().await.expect("worker must spawn");

    let result = send_bounded(&bridge, json!({"cmd": "decrypt"})).await;
    assert_eq!(result.expect("command must succeed"), json!({"ok": true}));

    bridge.stop().await;
}

// ── Scenario C: timeout ──────────────────────────────────────────────────────

/// A worker that never answers fails the command with `CommandTimedOut`
/// at the configured timeout.
#[tokio::test]
#[serial]
async fn silent_worker_times_out() {
    let bridge = bridge("sleep 5", Duration::from_millis(300));
    bridge.start().await.expect("worker must spawn");

    let result = send_bounded(&bridge, json!({"cmd": "ping"})).await;
    assert!(
        matches!(result, Err(BridgeError::CommandTimedOut)),
        "expected CommandTimedOut, got: {result:?}"
    );

    bridge.stop().await;
}

/// A `complete` envelope arriving after the timeout is a no-op for the
/// already-failed command: the bridge stays live and the late envelope
/// reaches only the passive observer.
#[tokio::test]
#[serial]
async fn late_complete_after_timeout_is_ignored() {
    let bridge = Arc::new(bridge(
        r#"read line; sleep 1; printf '{"type":"complete","data":1}\n'; sleep 2"#,
        Duration::from_millis(200),
    ));
    bridge.start().await.expect("worker must spawn");

    let (event_tx, mut event_rx) = mpsc::channel(16);
    bridge.attach_observer(event_tx).await.expect("attach observer");

    let result = send_bounded(&bridge, json!({"cmd": "slow"})).await;
    assert!(
        matches!(result, Err(BridgeError::CommandTimedOut)),
        "expected CommandTimedOut, got: {result:?}"
    );

    // The late envelope still flows to the observer; the settled command
    // is not resurrected.
    let event = tokio::time::timeout(TEST_DEADLINE, event_rx.recv())
        .await
        .expect("observer must receive the late envelope")
        .expect("observer channel must stay open");
    match event {
        BridgeEvent::PythonMessage(envelope) => assert!(envelope.is_complete()),
        BridgeEvent::PythonError { text } => panic!("unexpected python-error: {text}"),
    }
    assert!(bridge.is_running().await, "bridge must remain live");

    bridge.stop().await;
}

// ── Scenario D: stderr fails the pending command ─────────────────────────────

/// Diagnostic output while a command is pending fails it with
/// `CommandFailed` carrying the raw text.
#[tokio::test]
async fn stderr_fails_pending_command() {
    let bridge = bridge(
        "read line; echo 'Traceback (most recent call last):' 1>&2; sleep 2",
        Duration::from_secs(30),
    );
    bridge.start().await.expect("worker must spawn");

    let result = send_bounded(&bridge, json!({"cmd": "decrypt"})).await;
    match result {
        Err(BridgeError::CommandFailed(text)) => assert!(
            text.contains("Traceback"),
            "failure must carry the diagnostic text, got: {text}"
        ),
        other => panic!("expected Err(BridgeError::CommandFailed), got: {other:?}"),
    }

    bridge.stop().await;
}

// ── Single-flight constraint ─────────────────────────────────────────────────

/// The wire protocol has no correlation id, so a second concurrent `send`
/// is rejected with `Busy` while the first stays pending.
#[tokio::test]
#[serial]
async fn concurrent_send_is_rejected_with_busy() {
    let bridge = Arc::new(bridge(
        r#"read line; sleep 1; printf '{"type":"complete","data":"done"}\n'; sleep 2"#,
        Duration::from_secs(30),
    ));
    bridge.start().await.expect("worker must spawn");

    let first = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move { bridge.send(json!({"cmd": "first"})).await })
    };

    // Give the first send time to register as in flight.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let second = bridge.send(json!({"cmd": "second"})).await;
    assert!(
        matches!(second, Err(BridgeError::Busy)),
        "expected Busy for the concurrent send, got: {second:?}"
    );

    let first = tokio::time::timeout(TEST_DEADLINE, first)
        .await
        .expect("first send must resolve")
        .expect("task must not panic");
    assert_eq!(first.expect("first command must succeed"), json!("done"));

    bridge.stop().await;
}

// ── Dual delivery ────────────────────────────────────────────────────────────

/// A `complete` envelope both resolves the awaiting `send` and is
/// separately delivered to the observer; progress envelopes reach the
/// observer even while a command is pending.
#[tokio::test]
async fn complete_envelope_is_dual_delivered() {
    let bridge = Arc::new(bridge(
        concat!(
            "read line; ",
            r#"printf '{"type":"progress","value":50}\n'; "#,
            r#"printf '{"type":"complete","data":{"count":3}}\n'; "#,
            "sleep 2",
        ),
        Duration::from_secs(30),
    ));
    bridge.start().await.expect("worker must spawn");

    let (event_tx, mut event_rx) = mpsc::channel(16);
    bridge.attach_observer(event_tx).await.expect("attach observer");

    let result = send_bounded(&bridge, json!({"cmd": "decrypt"})).await;
    assert_eq!(result.expect("command must succeed"), json!({"count": 3}));

    let mut kinds = Vec::new();
    for _ in 0..2 {
        let event = tokio::time::timeout(TEST_DEADLINE, event_rx.recv())
            .await
            .expect("observer must receive the envelope")
            .expect("observer channel must stay open");
        match event {
            BridgeEvent::PythonMessage(envelope) => kinds.push(envelope.kind),
            BridgeEvent::PythonError { text } => panic!("unexpected python-error: {text}"),
        }
    }
    assert_eq!(
        kinds,
        vec!["progress".to_owned(), "complete".to_owned()],
        "observer must receive every envelope in stream order"
    );

    bridge.stop().await;
}

// ── Stop and restart ─────────────────────────────────────────────────────────

/// `stop` is idempotent, and `send` after `stop` fails fast.
#[tokio::test]
async fn stop_is_idempotent_and_send_after_stop_fails() {
    let bridge = bridge("sleep 30", Duration::from_secs(5));
    bridge.start().await.expect("worker must spawn");
    assert!(bridge.is_running().await);

    bridge.stop().await;
    bridge.stop().await; // second stop is a no-op

    assert!(!bridge.is_running().await);
    let result = bridge.send(json!({"cmd": "ping"})).await;
    assert!(
        matches!(result, Err(BridgeError::ProcessNotRunning)),
        "expected ProcessNotRunning after stop, got: {result:?}"
    );
}

/// `stop` completes promptly even when the attached observer never drains
/// its channel and the worker has flooded it with events.
#[tokio::test]
#[serial]
async fn stop_completes_with_undrained_observer() {
    let bridge = Arc::new(bridge(
        concat!(
            "sleep 1; ",
            r#"printf '{"type":"progress","value":1}\n{"type":"progress","value":2}\n{"type":"progress","value":3}\n'; "#,
            "sleep 30",
        ),
        Duration::from_secs(30),
    ));
    bridge.start().await.expect("worker must spawn");

    // Capacity one and never drained: relaying the events must stall.
    let (event_tx, _event_rx) = mpsc::channel(1);
    bridge.attach_observer(event_tx).await.expect("attach observer");

    // Give the worker time to emit and the relay time to fill the channel.
    tokio::time::sleep(Duration::from_secs(2)).await;

    tokio::time::timeout(TEST_DEADLINE, bridge.stop())
        .await
        .expect("stop must complete despite the stalled observer");
    assert!(!bridge.is_running().await);
}

/// An exited worker leaves the bridge unable to serve commands until an
/// explicit restart, which then serves commands again.
#[tokio::test]
#[serial]
async fn restart_after_worker_exit_serves_commands_again() {
    let script = r#"read line; printf '{"type":"complete","data":"one-shot"}\n'; sleep 1"#;
    let bridge = bridge(script, Duration::from_secs(30));

    bridge.start().await.expect("worker must spawn");
    let result = send_bounded(&bridge, json!({"cmd": "go"})).await;
    assert_eq!(result.expect("first run must succeed"), json!("one-shot"));

    // The one-shot worker exits shortly after answering.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!bridge.is_running().await, "worker exit must be observed");

    let stale = bridge.send(json!({"cmd": "go"})).await;
    assert!(
        matches!(stale, Err(BridgeError::ProcessNotRunning)),
        "no respawn is attempted without an explicit start, got: {stale:?}"
    );

    bridge.start().await.expect("restart must spawn a fresh worker");
    let result = send_bounded(&bridge, json!({"cmd": "go"})).await;
    assert_eq!(result.expect("second run must succeed"), json!("one-shot"));

    bridge.stop().await;
}

// ── Worker exit while pending ────────────────────────────────────────────────

/// A worker that dies before answering fails the pending command
/// immediately instead of letting it ride out the timeout.
#[tokio::test]
#[serial]
async fn worker_exit_fails_pending_command_immediately() {
    let bridge = bridge("read line; exit 3", Duration::from_secs(300));
    bridge.start().await.expect("worker must spawn");

    let started = std::time::Instant::now();
    let result = send_bounded(&bridge, json!({"cmd": "doomed"})).await;

    assert!(
        matches!(result, Err(BridgeError::CommandFailed(_))),
        "expected CommandFailed on worker exit, got: {result:?}"
    );
    assert!(
        started.elapsed() < TEST_DEADLINE,
        "failure must be immediate, not timeout-bound"
    );

    bridge.stop().await;
}

// ── Spawn failure ────────────────────────────────────────────────────────────

/// A bad executable path surfaces as `SpawnFailed` and leaves the bridge
/// unable to serve commands.
#[tokio::test]
async fn bad_executable_fails_with_spawn_failed() {
    let bridge = WorkerBridge::new(
        LaunchSpec {
            executable: "/nonexistent/mvmz-backend".into(),
            args: Vec::new(),
            working_dir: std::env::temp_dir(),
        },
        Duration::from_secs(5),
    );

    let result = bridge.start().await;
    assert!(
        matches!(result, Err(BridgeError::SpawnFailed(_))),
        "expected SpawnFailed, got: {result:?}"
    );

    let send = bridge.send(json!({"cmd": "ping"})).await;
    assert!(matches!(send, Err(BridgeError::ProcessNotRunning)));
}

/// Starting a bridge that already has a live worker is rejected; at most
/// one worker is active at a time.
#[tokio::test]
async fn start_while_running_is_rejected() {
    let bridge = bridge("sleep 30", Duration::from_secs(5));
    bridge.start().await.expect("worker must spawn");

    let second = bridge.start().await;
    assert!(
        matches!(second, Err(BridgeError::SpawnFailed(_))),
        "expected SpawnFailed for double start, got: {second:?}"
    );

    bridge.stop().await;
}
