//! Event forwarder — passive relay of worker events to an observer.
//!
//! Stateless: every classified envelope (any kind, pending command or not)
//! and every stderr chunk is delivered to the registered observer channel,
//! independent of command correlation. No buffering beyond channel
//! capacity, no ordering guarantee across the two streams. With no
//! observer attached the forwarder is never spawned and the broadcast
//! channels drop events on the floor.

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::worker::envelope::Envelope;

/// Observer-facing event emitted by the bridge.
///
/// Serialises with kebab-case event names matching the host boundary:
/// `python-message` for classified envelopes, `python-error` for raw
/// diagnostic output.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum BridgeEvent {
    /// A classified envelope from the worker's stdout, any kind.
    PythonMessage(Envelope),
    /// A raw diagnostic chunk from the worker's stderr.
    PythonError {
        /// Diagnostic text, lossily decoded as UTF-8.
        text: String,
    },
}

/// Relay every envelope and diagnostic chunk to `observer`.
///
/// Exits when `cancel` fires, when the observer channel closes, or when
/// both source channels close (worker stopped). A lagged broadcast
/// subscription is logged and skipped — dropped events are not replayed.
/// The observer send itself also races `cancel`, so a full, undrained
/// observer channel cannot wedge the task past shutdown.
pub async fn run_forwarder(
    mut envelopes: broadcast::Receiver<Envelope>,
    mut diagnostics: broadcast::Receiver<String>,
    observer: mpsc::Sender<BridgeEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("forwarder: cancellation received, stopping");
                break;
            }

            env = envelopes.recv() => match env {
                Ok(envelope) => BridgeEvent::PythonMessage(envelope),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "forwarder: envelope subscription lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("forwarder: envelope channel closed, stopping");
                    break;
                }
            },

            diag = diagnostics.recv() => match diag {
                Ok(text) => BridgeEvent::PythonError { text },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "forwarder: diagnostic subscription lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("forwarder: diagnostic channel closed, stopping");
                    break;
                }
            },
        };

        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("forwarder: cancellation received while delivering, stopping");
                break;
            }

            sent = observer.send(event) => {
                if sent.is_err() {
                    debug!("forwarder: observer channel closed, stopping");
                    break;
                }
            }
        }
    }
}
