//! Worker process stream handling.
//!
//! This module manages the single long-lived worker process and its
//! newline-delimited JSON stdio bridge.
//!
//! Submodules:
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based line framing for the worker's stdout.
//! - `envelope`: classification of stdout lines into JSON envelopes or
//!   plain diagnostic text.
//! - `reader`: async read tasks over the worker's stdout and stderr.
//! - `writer`: async write task serialising commands to the worker's stdin.
//! - `supervisor`: process lifecycle and command correlation
//!   ([`WorkerBridge`](supervisor::WorkerBridge)).
//! - `forwarder`: passive relay of all worker events to an observer.

pub mod codec;
pub mod envelope;
pub mod forwarder;
pub mod reader;
pub mod supervisor;
pub mod writer;

pub use envelope::{Classified, Envelope};
pub use forwarder::BridgeEvent;
pub use supervisor::WorkerBridge;
