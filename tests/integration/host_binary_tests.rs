//! Integration tests driving the `mvmz-bridge` binary end to end.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Write a bridge config pointing both modes at a `/bin/sh` worker.
fn write_config(dir: &std::path::Path, script: &str) -> std::path::PathBuf {
    let config = format!(
        r#"
mode = "development"

[worker.development]
executable = "/bin/sh"
args = ["-c", "{script}"]
working_dir = "{dir}"

[worker.packaged]
executable = "/bin/sh"
args = ["-c", "{script}"]
working_dir = "{dir}"
"#,
        script = script,
        dir = dir.display(),
    );
    let path = dir.join("bridge.toml");
    std::fs::write(&path, config).expect("write config");
    path
}

/// A host that closes the bridge's stdout must not crash it: outbound
/// events fail to write, the failure is logged, and closing stdin still
/// shuts the bridge down cleanly.
#[tokio::test]
async fn closed_stdout_does_not_crash_the_bridge() {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = write_config(
        dir.path(),
        r#"read line; printf '{\"type\":\"complete\",\"data\":\"ok\"}\\n'; sleep 1"#,
    );

    let mut child = Command::new(env!("CARGO_BIN_EXE_mvmz-bridge"))
        .arg("--config")
        .arg(&config)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .expect("bridge binary must spawn");

    // Close the read end of stdout before any event flows.
    drop(child.stdout.take());

    // Let the bridge finish startup, then drive one command; its result
    // emission hits the closed stdout.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let mut stdin = child.stdin.take().expect("stdin is piped");
    stdin
        .write_all(b"{\"cmd\":\"go\"}\n")
        .await
        .expect("command must reach the bridge");
    stdin.flush().await.expect("flush stdin");
    tokio::time::sleep(Duration::from_secs(2)).await;

    // EOF on stdin requests an orderly shutdown.
    drop(stdin);

    let status = tokio::time::timeout(Duration::from_secs(10), child.wait())
        .await
        .expect("bridge must exit after stdin closes")
        .expect("wait must succeed");
    assert!(
        status.success(),
        "bridge must exit cleanly despite the closed stdout, got: {status:?}"
    );
}
