//! Worker stdin writer task.
//!
//! Receives outbound command payloads from a tokio [`mpsc`] channel,
//! serialises each value to a compact single-line JSON string, and writes
//! the NDJSON line to the worker's `stdin`.
//!
//! The worker's stdin is a single shared write target; funnelling all
//! writes through this task guarantees one full JSON line per write with
//! no interleaving.

use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Serialise outbound commands and write them to the worker's `stdin`.
///
/// Exits cleanly when `cancel` fires or when `cmd_rx` closes (all senders
/// dropped). A failed write (worker exited, pipe closed) stops the task;
/// the pending command then fails via the exit monitor rather than through
/// this path.
pub async fn run_writer(
    stdin: ChildStdin,
    mut cmd_rx: mpsc::Receiver<serde_json::Value>,
    cancel: CancellationToken,
) {
    let mut stdin = stdin;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("stdin writer: cancellation received, stopping");
                break;
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    None => {
                        debug!("stdin writer: command channel closed, stopping");
                        break;
                    }
                    Some(value) => {
                        let mut bytes = match serde_json::to_vec(&value) {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                warn!(error = %e, "stdin writer: failed to serialise command");
                                continue;
                            }
                        };

                        // NDJSON: append the newline delimiter.
                        bytes.push(b'\n');

                        if let Err(e) = stdin.write_all(&bytes).await {
                            warn!(error = %e, "stdin writer: write to worker stdin failed");
                            break;
                        }
                        if let Err(e) = stdin.flush().await {
                            warn!(error = %e, "stdin writer: flush failed");
                            break;
                        }
                    }
                }
            }
        }
    }
}
