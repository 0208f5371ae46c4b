//! Worker message classification.
//!
//! The worker emits two classes of stdout lines:
//!
//! - Structured: lines beginning with the literal prefix `{"type":` are JSON
//!   envelopes with at least a `type` field. A `type` of `complete` carries
//!   the result of the in-flight command in its `data` field; every other
//!   `type` is a progress/status event with an observer-defined payload.
//! - Unstructured: any other non-empty line is plain diagnostic text.
//!
//! A prefixed line that fails JSON parsing is a reportable error
//! ([`BridgeError::Envelope`]); the caller logs it and drops the line
//! without failing any pending command.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{BridgeError, Result};

/// Literal marker indicating a stdout line is a JSON envelope.
pub const ENVELOPE_PREFIX: &str = "{\"type\":";

/// Envelope `type` value that resolves the in-flight command.
pub const KIND_COMPLETE: &str = "complete";

/// One parsed structured message emitted by the worker.
///
/// The payload is kept opaque: aside from the `type` discriminant and the
/// `data` field of `complete` envelopes, no shape is assumed, so new worker
/// message kinds pass through the bridge unchanged.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Envelope {
    /// Message kind discriminant; `type` on the wire.
    #[serde(rename = "type")]
    pub kind: String,
    /// All remaining fields of the envelope, untouched.
    #[serde(flatten)]
    pub payload: serde_json::Map<String, Value>,
}

impl Envelope {
    /// Whether this envelope resolves the in-flight command.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.kind == KIND_COMPLETE
    }

    /// The `data` field used as the command result, if present.
    #[must_use]
    pub fn data(&self) -> Option<&Value> {
        self.payload.get("data")
    }

    /// Consume the envelope and take its `data` field, defaulting to null.
    #[must_use]
    pub fn into_data(mut self) -> Value {
        self.payload.remove("data").unwrap_or(Value::Null)
    }
}

/// Result of classifying one non-empty stdout line.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// The line carried the structured-message prefix and parsed as JSON.
    Envelope(Envelope),
    /// The line is plain diagnostic/log text from the worker.
    Diagnostic(String),
}

/// Classify one stdout line from the worker.
///
/// Returns `Ok(None)` for empty or whitespace-only lines. Lines beginning
/// with [`ENVELOPE_PREFIX`] are parsed as JSON envelopes; all other lines
/// are [`Classified::Diagnostic`] text.
///
/// # Errors
///
/// Returns [`BridgeError::Envelope`]`("malformed envelope: …")` when a
/// prefixed line is not valid JSON. The line is dropped by the caller; the
/// error never fails a pending command.
pub fn classify_line(line: &str) -> Result<Option<Classified>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    if !trimmed.starts_with(ENVELOPE_PREFIX) {
        return Ok(Some(Classified::Diagnostic(trimmed.to_owned())));
    }

    let envelope: Envelope = serde_json::from_str(trimmed)
        .map_err(|e| BridgeError::Envelope(format!("malformed envelope: {e}")))?;

    Ok(Some(Classified::Envelope(envelope)))
}
