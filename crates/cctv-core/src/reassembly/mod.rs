//! Best-effort image salvage for channels without framing.
//!
//! Some server builds push raw image bytes straight onto the socket with no
//! length prefix and no delimiter.  The only end-of-message signal is that
//! the server stops sending for a while.  This module handles that case in
//! two parts:
//!
//! - [`ReassemblyBuffer`] accumulates bytes and reports when the stream has
//!   been quiet for the configured period (2 s by default).
//! - [`ImageReassembler`] carves images out of the accumulated blob: first by
//!   JPEG start/end markers, then by decoding the whole blob with each
//!   supported format forced, then by splitting it into equal chunks.
//!
//! **This path is lossy and non-deterministic.**  Images that straddle a
//! quiet period are split, corrupt slices are silently discarded, and chunk
//! splitting can yield fragments that happen to decode.  Use a framed channel
//! whenever the server supports one.

mod extractor;
pub mod markers;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use image::ImageFormat;
use thiserror::Error;

pub use extractor::ImageReassembler;

/// Default inactivity window after which buffered bytes are processed.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(2000);

/// Errors from the salvage path.  Undecodable candidates are not errors.
#[derive(Debug, Error)]
pub enum ReassemblyError {
    #[error("I/O error writing salvaged image to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Which stage of the salvage algorithm produced an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SalvageStrategy {
    MarkerScan,
    FormatProbe,
    ChunkSplit,
}

/// An image recovered from a blob and written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalvagedImage {
    pub path: PathBuf,
    pub format: ImageFormat,
    pub byte_len: usize,
    pub width: u32,
    pub height: u32,
    pub strategy: SalvageStrategy,
}

/// Accumulates unframed bytes until the stream goes quiet.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    bytes: Vec<u8>,
    last_received_at: Option<Instant>,
    quiet_period: Duration,
}

impl ReassemblyBuffer {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            bytes: Vec::new(),
            last_received_at: None,
            quiet_period,
        }
    }

    /// Appends a chunk and restarts the quiet-period window from `now`.
    pub fn push(&mut self, chunk: &[u8], now: Instant) {
        self.bytes.extend_from_slice(chunk);
        self.last_received_at = Some(now);
    }

    /// The instant at which the buffer becomes ready, if it holds any bytes.
    pub fn deadline(&self) -> Option<Instant> {
        if self.bytes.is_empty() {
            return None;
        }
        self.last_received_at.map(|t| t + self.quiet_period)
    }

    /// Whether the buffer holds bytes and nothing has arrived for a full quiet period.
    pub fn is_quiet(&self, now: Instant) -> bool {
        self.deadline().map_or(false, |deadline| now >= deadline)
    }

    /// Takes the accumulated blob, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<u8> {
        self.last_received_at = None;
        std::mem::take(&mut self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }
}

impl Default for ReassemblyBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_QUIET_PERIOD)
    }
}
