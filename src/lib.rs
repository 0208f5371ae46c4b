#![forbid(unsafe_code)]

//! `mvmz-bridge` — supervisor and NDJSON command bridge for the MVMZ
//! crypter backend worker process.
//!
//! The bridge spawns one long-lived worker, streams newline-delimited JSON
//! envelopes from its stdout, correlates asynchronous `complete` responses
//! to in-flight commands, forwards every envelope and stderr chunk to a
//! passive observer, and enforces a per-command timeout.

pub mod config;
pub mod errors;
pub mod worker;

pub use config::BridgeConfig;
pub use errors::{BridgeError, Result};
