//! Error types shared across the bridge.

use std::fmt::{Display, Formatter};

/// Shared bridge result type.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Bridge error enumeration covering all failure modes surfaced to callers.
#[derive(Debug)]
pub enum BridgeError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Worker process could not be started; fatal until an explicit restart.
    SpawnFailed(String),
    /// Command attempted with no live worker; fails fast, no write occurs.
    ProcessNotRunning,
    /// A command is already in flight; the wire protocol carries no
    /// correlation id, so concurrent sends are rejected rather than risking
    /// a misrouted response.
    Busy,
    /// Diagnostic-stream output arrived while a command was pending;
    /// carries the raw diagnostic text as the failure reason.
    CommandFailed(String),
    /// No resolving event arrived within the command timeout window.
    CommandTimedOut,
    /// A structured-prefixed line failed JSON parsing, or line framing
    /// failed (e.g. over-long line). Logged and dropped by the reader;
    /// never fails a pending command.
    Envelope(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for BridgeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::SpawnFailed(msg) => write!(f, "spawn failed: {msg}"),
            Self::ProcessNotRunning => write!(f, "worker process not running"),
            Self::Busy => write!(f, "a command is already in flight"),
            Self::CommandFailed(msg) => write!(f, "command failed: {msg}"),
            Self::CommandTimedOut => write!(f, "command timed out"),
            Self::Envelope(msg) => write!(f, "envelope: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<toml::de::Error> for BridgeError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
