//! Worker process supervisor and command correlator.
//!
//! [`WorkerBridge`] owns the single worker process: it spawns the worker
//! with all three stdio pipes captured, attaches the stdout/stderr reader
//! tasks and the stdin writer task once per lifetime, and monitors the
//! process for exit. Commands are correlated to responses by
//! first-completion-wins: the wire protocol carries no correlation id, so
//! at most one command may be in flight at a time and a concurrent
//! [`WorkerBridge::send`] is rejected with [`BridgeError::Busy`].
//!
//! # Command resolution
//!
//! `send` races, inside a single timeout, the first of:
//! - a `complete` envelope — success, carrying the envelope's `data`;
//! - any stderr output — failure carrying the raw text (the worker
//!   protocol treats stderr as its error channel, so even warning output
//!   fails the pending command; stderr is also logged and forwarded so it
//!   is never lost);
//! - worker exit — immediate failure rather than waiting out the timeout;
//! - timeout elapse — [`BridgeError::CommandTimedOut`].
//!
//! Whichever arm wins, dropping the transient broadcast subscriptions and
//! the timeout future detaches everything; late events are no-ops.

use std::time::Duration;

use serde_json::Value;
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{BridgeConfig, LaunchSpec};
use crate::worker::envelope::Envelope;
use crate::worker::forwarder::{run_forwarder, BridgeEvent};
use crate::worker::reader::{run_stdout_reader, run_stderr_reader};
use crate::worker::writer::run_writer;
use crate::{BridgeError, Result};

/// Broadcast capacity for the envelope and diagnostic channels.
const CHANNEL_CAPACITY: usize = 64;

/// Grace period between SIGTERM and SIGKILL when stopping the worker.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Live state for one running worker process.
struct Running {
    cancel: CancellationToken,
    stdin_tx: mpsc::Sender<Value>,
    envelope_tx: broadcast::Sender<Envelope>,
    diagnostic_tx: broadcast::Sender<String>,
    exited_rx: watch::Receiver<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Running {
    fn is_live(&self) -> bool {
        !*self.exited_rx.borrow()
    }
}

/// Supervisor for the worker process and its NDJSON command bridge.
///
/// At most one worker is active at a time. An unexpected worker exit
/// leaves the bridge unable to serve commands ([`BridgeError::ProcessNotRunning`])
/// until an explicit [`WorkerBridge::start`]; no automatic respawn is
/// attempted.
pub struct WorkerBridge {
    launch: LaunchSpec,
    command_timeout: Duration,
    state: Mutex<Option<Running>>,
    in_flight: Mutex<()>,
}

impl WorkerBridge {
    /// Create a bridge for the given launch spec and per-command timeout.
    #[must_use]
    pub fn new(launch: LaunchSpec, command_timeout: Duration) -> Self {
        Self {
            launch,
            command_timeout,
            state: Mutex::new(None),
            in_flight: Mutex::new(()),
        }
    }

    /// Create a bridge from configuration, using the active launch mode.
    #[must_use]
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.launch_spec().clone(), config.command_timeout())
    }

    /// Spawn the worker process and attach the stream tasks.
    ///
    /// stdin, stdout, and stderr are all captured as pipes; the stdout
    /// pipeline (line framing + classification) is attached once,
    /// persistently, not per command. Restarting after a worker exit
    /// replaces the dead state.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::SpawnFailed`] if a worker is already live, or if
    ///   the OS spawn fails (bad path, missing executable) — fatal for the
    ///   bridge until a successful restart.
    pub async fn start(&self) -> Result<()> {
        let mut guard = self.state.lock().await;

        if let Some(running) = guard.as_ref() {
            if running.is_live() {
                return Err(BridgeError::SpawnFailed("worker already running".into()));
            }
            // Previous worker exited; tear down its task set before respawn.
            running.cancel.cancel();
        }

        let mut cmd = Command::new(&self.launch.executable);
        cmd.args(&self.launch.args)
            .current_dir(&self.launch.working_dir)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| BridgeError::SpawnFailed(format!("failed to spawn worker: {err}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::SpawnFailed("failed to capture worker stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::SpawnFailed("failed to capture worker stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BridgeError::SpawnFailed("failed to capture worker stderr".into()))?;

        info!(
            executable = %self.launch.executable.display(),
            pid = child.id(),
            "worker process spawned"
        );

        let cancel = CancellationToken::new();
        let (envelope_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (diagnostic_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (stdin_tx, stdin_rx) = mpsc::channel::<Value>(CHANNEL_CAPACITY);
        let (exited_tx, exited_rx) = watch::channel(false);

        let tasks = vec![
            tokio::spawn(run_stdout_reader(
                stdout,
                envelope_tx.clone(),
                cancel.child_token(),
            )),
            tokio::spawn(run_stderr_reader(
                stderr,
                diagnostic_tx.clone(),
                cancel.child_token(),
            )),
            tokio::spawn(run_writer(stdin, stdin_rx, cancel.child_token())),
            tokio::spawn(monitor_exit(child, exited_tx, cancel.child_token())),
        ];

        *guard = Some(Running {
            cancel,
            stdin_tx,
            envelope_tx,
            diagnostic_tx,
            exited_rx,
            tasks,
        });

        Ok(())
    }

    /// Whether a live worker is currently attached.
    pub async fn is_running(&self) -> bool {
        self.state
            .lock()
            .await
            .as_ref()
            .is_some_and(Running::is_live)
    }

    /// Send one command to the worker and await its resolution.
    ///
    /// The command is serialised as a single JSON line and written to the
    /// worker's stdin. Resolution is first-event-wins; see the module docs
    /// for the race. The subscriptions are taken before the write so a
    /// fast worker cannot respond into a gap.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::ProcessNotRunning`] — no live worker; nothing is
    ///   written.
    /// - [`BridgeError::Busy`] — another command is already in flight.
    /// - [`BridgeError::CommandFailed`] — stderr output or worker exit
    ///   while the command was pending.
    /// - [`BridgeError::CommandTimedOut`] — no resolving event within the
    ///   configured timeout window.
    pub async fn send(&self, command: Value) -> Result<Value> {
        let (stdin_tx, mut envelopes, mut diagnostics, mut exited) = {
            let guard = self.state.lock().await;
            let running = guard.as_ref().ok_or(BridgeError::ProcessNotRunning)?;
            if !running.is_live() {
                return Err(BridgeError::ProcessNotRunning);
            }
            (
                running.stdin_tx.clone(),
                running.envelope_tx.subscribe(),
                running.diagnostic_tx.subscribe(),
                running.exited_rx.clone(),
            )
        };

        // Single-flight guard: the wire protocol has no correlation id, so
        // a concurrent send could steal this command's response.
        let Ok(_permit) = self.in_flight.try_lock() else {
            return Err(BridgeError::Busy);
        };

        if stdin_tx.send(command).await.is_err() {
            return Err(BridgeError::CommandFailed(
                "worker stdin closed before the command could be written".into(),
            ));
        }

        let wait = async {
            loop {
                tokio::select! {
                    env = envelopes.recv() => match env {
                        Ok(envelope) if envelope.is_complete() => {
                            return Ok(envelope.into_data());
                        }
                        Ok(envelope) => {
                            // Progress/status event; the forwarder relays it.
                            debug!(kind = envelope.kind.as_str(), "non-complete envelope while pending");
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "command wait: envelope subscription lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(BridgeError::CommandFailed(
                                "worker output stream closed".into(),
                            ));
                        }
                    },

                    diag = diagnostics.recv() => match diag {
                        Ok(text) => return Err(BridgeError::CommandFailed(text)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "command wait: diagnostic subscription lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(BridgeError::CommandFailed(
                                "worker diagnostic stream closed".into(),
                            ));
                        }
                    },

                    // Fail immediately on worker exit instead of waiting out
                    // the timeout. An error here means the exit monitor is
                    // gone entirely, which is treated the same way.
                    _ = exited.wait_for(|flag| *flag) => {
                        return Err(BridgeError::CommandFailed(
                            "worker process exited before completing the command".into(),
                        ));
                    }
                }
            }
        };

        match tokio::time::timeout(self.command_timeout, wait).await {
            Ok(resolution) => resolution,
            Err(_elapsed) => Err(BridgeError::CommandTimedOut),
        }
    }

    /// Attach an observer channel and spawn the event forwarder.
    ///
    /// Every classified envelope and every stderr chunk from now on is
    /// relayed to `observer` as a [`BridgeEvent`], independent of command
    /// correlation. Events emitted while no observer is attached are
    /// dropped, not queued.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ProcessNotRunning`] if no live worker is
    /// attached.
    pub async fn attach_observer(&self, observer: mpsc::Sender<BridgeEvent>) -> Result<()> {
        let mut guard = self.state.lock().await;
        let running = guard.as_mut().ok_or(BridgeError::ProcessNotRunning)?;
        if !running.is_live() {
            return Err(BridgeError::ProcessNotRunning);
        }

        let task = tokio::spawn(run_forwarder(
            running.envelope_tx.subscribe(),
            running.diagnostic_tx.subscribe(),
            observer,
            running.cancel.child_token(),
        ));
        running.tasks.push(task);

        Ok(())
    }

    /// Stop the worker if running; idempotent if already stopped.
    ///
    /// Cancels the task set (the exit monitor terminates the process with
    /// a SIGTERM grace period before killing it on unix) and awaits all
    /// tasks. Outstanding `send` calls fail immediately via the exit
    /// monitor rather than waiting out their timeout.
    pub async fn stop(&self) {
        let running = self.state.lock().await.take();
        let Some(running) = running else {
            debug!("stop: no worker attached");
            return;
        };

        running.cancel.cancel();
        for task in running.tasks {
            if let Err(err) = task.await {
                warn!(%err, "stop: worker task join failed");
            }
        }
        info!("worker stopped");
    }
}

// ── Exit monitor ─────────────────────────────────────────────────────────────

/// Await child exit, or terminate the child on cancellation.
///
/// Flips the liveness watch in both cases so pending commands fail
/// immediately instead of timing out.
async fn monitor_exit(mut child: Child, exited_tx: watch::Sender<bool>, cancel: CancellationToken) {
    tokio::select! {
        result = child.wait() => {
            match result {
                Ok(status) => {
                    let detail = status.code().map_or_else(
                        || "terminated by signal".to_owned(),
                        |c| format!("exited with code {c}"),
                    );
                    info!(status = detail.as_str(), "worker process exited");
                }
                Err(err) => {
                    warn!(%err, "error waiting for worker process");
                }
            }
        }
        () = cancel.cancelled() => {
            terminate(child).await;
        }
    }

    let _ = exited_tx.send(true);
}

/// Terminate the child: SIGTERM, a grace period, then SIGKILL.
#[cfg(unix)]
async fn terminate(mut child: Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        #[allow(clippy::cast_possible_wrap)]
        let pid = Pid::from_raw(pid as i32);
        if let Err(err) = kill(pid, Signal::SIGTERM) {
            debug!(%err, "SIGTERM failed, process may already be gone");
        }

        if tokio::time::timeout(TERMINATE_GRACE, child.wait())
            .await
            .is_ok()
        {
            return;
        }
        warn!("worker ignored SIGTERM, killing");
    }

    if let Err(err) = child.kill().await {
        debug!(%err, "kill failed, process may already be gone");
    }
}

/// Terminate the child: hard kill (no signal support on this platform).
#[cfg(not(unix))]
async fn terminate(mut child: Child) {
    if let Err(err) = child.kill().await {
        debug!(%err, "kill failed, process may already be gone");
    }
}
