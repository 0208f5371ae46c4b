//! Worker output reader tasks.
//!
//! Two tasks, attached once per worker lifetime (not per command):
//!
//! - [`run_stdout_reader`] drives a [`FramedRead`] over the worker's stdout
//!   using [`LineCodec`], classifies each complete line via
//!   [`classify_line`], and publishes every [`Envelope`] on a broadcast
//!   channel. Both the command correlator (transient per-command
//!   subscription) and the event forwarder (persistent subscription)
//!   receive every envelope; this dual dispatch is intentional.
//! - [`run_stderr_reader`] reads raw chunks from the worker's stderr,
//!   logs them, and publishes the text on the diagnostic broadcast channel.
//!
//! Malformed envelopes and over-long lines are logged and skipped; they do
//! not terminate the reader and never fail a pending command.

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::broadcast;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::worker::codec::LineCodec;
use crate::worker::envelope::{classify_line, Classified, Envelope};
use crate::BridgeError;

/// Read NDJSON lines from the worker's stdout and broadcast envelopes.
///
/// Plain (non-prefixed) stdout lines are worker log text; they are logged
/// at `INFO` and not broadcast — only stderr output fails a pending
/// command.
///
/// Exits on EOF, unrecoverable I/O error, or cancellation. A broadcast
/// send with no live subscribers is not an error; the envelope is simply
/// dropped.
pub async fn run_stdout_reader<R>(
    stdout: R,
    envelope_tx: broadcast::Sender<Envelope>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, LineCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("stdout reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        // EOF — worker stdout closed.
                        debug!("stdout reader: EOF detected");
                        break;
                    }

                    Some(Err(BridgeError::Envelope(msg))) => {
                        // Framing error (e.g. line too long) — skip the line.
                        warn!(error = msg.as_str(), "stdout reader: framing error, skipping");
                    }

                    Some(Err(e)) => {
                        warn!(error = %e, "stdout reader: IO error, stopping");
                        break;
                    }

                    Some(Ok(line)) => match classify_line(&line) {
                        Ok(Some(Classified::Envelope(envelope))) => {
                            // No subscribers means no observer and no pending
                            // command; the envelope is dropped, not queued.
                            let _ = envelope_tx.send(envelope);
                        }
                        Ok(Some(Classified::Diagnostic(text))) => {
                            info!(worker_log = text.as_str(), "worker stdout");
                        }
                        Ok(None) => {
                            // Whitespace-only line.
                        }
                        Err(e) => {
                            warn!(
                                error = %e,
                                raw_line = line.as_str(),
                                "stdout reader: dropping malformed envelope"
                            );
                        }
                    },
                }
            }
        }
    }
}

/// Read raw chunks from the worker's stderr and broadcast the text.
///
/// Every non-empty chunk is logged at `WARN` and published on
/// `diagnostic_tx`; while a command is pending, the correlator treats the
/// first such chunk as that command's failure reason.
pub async fn run_stderr_reader<R>(
    stderr: R,
    diagnostic_tx: broadcast::Sender<String>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut stderr = stderr;
    let mut buf = vec![0u8; 8192];

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("stderr reader: cancellation received, stopping");
                break;
            }

            read = stderr.read(&mut buf) => {
                match read {
                    Ok(0) => {
                        debug!("stderr reader: EOF detected");
                        break;
                    }
                    Ok(n) => {
                        let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                        warn!(worker_error = text.as_str(), "worker stderr");
                        let _ = diagnostic_tx.send(text);
                    }
                    Err(e) => {
                        warn!(error = %e, "stderr reader: IO error, stopping");
                        break;
                    }
                }
            }
        }
    }
}
