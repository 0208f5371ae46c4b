//! NDJSON codec for the worker's stdout stream.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a configurable maximum line
//! length to prevent memory exhaustion caused by unterminated or runaway
//! output from a misbehaving worker process.
//!
//! # Usage
//!
//! Use [`LineCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`] over the worker's stdout. Each
//! newline-terminated (`\n`) UTF-8 string is one candidate message line;
//! partial lines are buffered across chunk boundaries until the newline
//! arrives.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::{BridgeError, Result};

/// Maximum line length accepted by the worker codec: 1 MiB.
///
/// Lines exceeding this limit cause [`LineCodec::decode`] to return
/// [`BridgeError::Envelope`] with `"line too long"`, protecting the bridge
/// from allocating unbounded memory for a single message.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Line-framing codec for the worker's stdout stream.
///
/// Delegates framing to [`LinesCodec`] with a fixed [`MAX_LINE_BYTES`]
/// limit. Inbound lines longer than the limit return
/// [`BridgeError::Envelope`]`("line too long: …")` rather than allocating;
/// I/O errors are mapped to [`BridgeError::Io`].
#[derive(Debug)]
pub struct LineCodec(LinesCodec);

impl LineCodec {
    /// Create a new `LineCodec` with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = BridgeError;

    /// Decode the next newline-terminated line from `src`.
    ///
    /// Returns `Ok(None)` when `src` contains no complete line yet
    /// (buffering). Returns `Err(BridgeError::Envelope("line too long: …"))`
    /// when the line exceeds [`MAX_LINE_BYTES`].
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    /// Decode the final line when the stream reaches EOF.
    ///
    /// A trailing fragment without a terminating newline is yielded here;
    /// the reader decides whether to keep or discard it.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

// ── Private helper ────────────────────────────────────────────────────────────

/// Map a [`LinesCodecError`] to a [`BridgeError`].
fn map_codec_error(e: LinesCodecError) -> BridgeError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            BridgeError::Envelope(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => BridgeError::Io(io_err.to_string()),
    }
}
