//! Byte-stream framing for the two wire conventions used by the server.
//!
//! ```text
//! LineDelimitedJson:     {"request_id":3}\n{"request_id":7}\n
//! LengthPrefixedBinary:  [len:4 BE][len bytes of UTF-8 JSON][len:4 BE]...
//! ```
//!
//! # Why a decoder object? (for beginners)
//!
//! A TCP `read()` returns whatever bytes happen to have arrived.  One call may
//! deliver half a frame, the next call the other half plus two more frames.
//! [`FrameDecoder`] keeps the unconsumed tail between calls to [`FrameDecoder::feed`]
//! so callers can hand it chunks of any size, down to a single byte, and still
//! get back exactly the frames the server sent, in order.
//!
//! A channel uses one framing mode for its whole lifetime; the two are never
//! interleaved on the same socket.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::protocol::ProtocolError;

/// Upper bound on a single length-prefixed payload (10 MiB).
pub const MAX_FRAME_LEN: usize = 10 * 1024 * 1024;

/// Size of the big-endian length header in [`FramingMode::LengthPrefixedBinary`].
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// The convention used to find message boundaries on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramingMode {
    /// One JSON object per line, terminated by `\n`.
    #[default]
    LineDelimitedJson,
    /// A 4-byte big-endian length followed by that many bytes of JSON.
    LengthPrefixedBinary,
}

/// How the length-prefixed decoder recovers from an implausible header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResyncStrategy {
    /// Drop everything buffered and start fresh with the next read.
    ///
    /// Any valid frames that were queued behind the corrupt header are lost.
    #[default]
    DiscardBuffer,
    /// Drop bytes one at a time until a plausible header is found.
    ScanForward,
}

/// One complete message extracted from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The payload bytes, without the newline or length header.
    pub bytes: Vec<u8>,
    /// The framing mode the frame was extracted with.
    pub mode: FramingMode,
}

/// Resumable splitter that turns an arbitrarily chunked byte stream into frames.
#[derive(Debug)]
pub struct FrameDecoder {
    mode: FramingMode,
    resync: ResyncStrategy,
    max_frame_len: usize,
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Creates an empty decoder for `mode` with the default 10 MiB ceiling.
    pub fn new(mode: FramingMode) -> Self {
        Self {
            mode,
            resync: ResyncStrategy::default(),
            max_frame_len: MAX_FRAME_LEN,
            buffer: Vec::new(),
        }
    }

    /// Selects the recovery strategy for oversized length headers.
    pub fn with_resync(mut self, resync: ResyncStrategy) -> Self {
        self.resync = resync;
        self
    }

    /// Overrides the length-header sanity ceiling.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Returns the framing mode this decoder was built with.
    pub fn mode(&self) -> FramingMode {
        self.mode
    }

    /// Number of bytes received but not yet emitted as a frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drops any partially received frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Appends `bytes` to the internal buffer and extracts every complete frame.
    ///
    /// The returned vector preserves stream order: a protocol error reported
    /// for one frame sits between the frames that preceded and followed it.
    /// Bytes belonging to an incomplete trailing frame stay buffered for the
    /// next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<Frame, ProtocolError>> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();
        match self.mode {
            FramingMode::LineDelimitedJson => self.drain_lines(&mut out),
            FramingMode::LengthPrefixedBinary => self.drain_length_prefixed(&mut out),
        }
        out
    }

    fn drain_lines(&mut self, out: &mut Vec<Result<Frame, ProtocolError>>) {
        let mut cursor = 0;
        while let Some(offset) = self.buffer[cursor..].iter().position(|&b| b == b'\n') {
            let line = trim_ascii_whitespace(&self.buffer[cursor..cursor + offset]);
            if !line.is_empty() {
                out.push(Ok(Frame {
                    bytes: line.to_vec(),
                    mode: self.mode,
                }));
            }
            cursor += offset + 1;
        }
        self.buffer.drain(..cursor);
    }

    fn drain_length_prefixed(&mut self, out: &mut Vec<Result<Frame, ProtocolError>>) {
        let mut cursor = 0;
        while self.buffer.len() - cursor >= LENGTH_PREFIX_SIZE {
            let declared = read_length(&self.buffer[cursor..]);

            if declared > self.max_frame_len {
                match self.resync {
                    ResyncStrategy::DiscardBuffer => {
                        let discarded = self.buffer.len() - cursor;
                        warn!(
                            "frame length {declared} exceeds {} bytes; discarding {discarded} buffered bytes",
                            self.max_frame_len
                        );
                        out.push(Err(ProtocolError::FrameTooLarge {
                            declared,
                            limit: self.max_frame_len,
                            discarded,
                        }));
                        self.buffer.clear();
                        return;
                    }
                    ResyncStrategy::ScanForward => {
                        let next = self.next_plausible_header(cursor + 1);
                        let discarded = next - cursor;
                        warn!(
                            "frame length {declared} exceeds {} bytes; skipped {discarded} bytes to resync",
                            self.max_frame_len
                        );
                        out.push(Err(ProtocolError::FrameTooLarge {
                            declared,
                            limit: self.max_frame_len,
                            discarded,
                        }));
                        cursor = next;
                        continue;
                    }
                }
            }

            if declared == 0 {
                warn!("skipping zero-length frame header");
                out.push(Err(ProtocolError::EmptyFrame));
                cursor += LENGTH_PREFIX_SIZE;
                continue;
            }

            let end = cursor + LENGTH_PREFIX_SIZE + declared;
            if self.buffer.len() < end {
                // Partial frame; wait for more bytes.
                break;
            }

            out.push(Ok(Frame {
                bytes: self.buffer[cursor + LENGTH_PREFIX_SIZE..end].to_vec(),
                mode: self.mode,
            }));
            cursor = end;
        }
        self.buffer.drain(..cursor);
    }

    /// Returns the offset of the first plausible header at or after `from`.
    ///
    /// A header is plausible when its length is non-zero and within the ceiling
    /// and, if the first payload byte has arrived, that byte opens a JSON object.
    /// When nothing plausible is buffered, the last three bytes are kept since
    /// they may be the start of a header that is still in flight.
    fn next_plausible_header(&self, from: usize) -> usize {
        let len = self.buffer.len();
        let mut pos = from;
        while pos + LENGTH_PREFIX_SIZE <= len {
            let declared = read_length(&self.buffer[pos..]);
            let payload_start = pos + LENGTH_PREFIX_SIZE;
            let opens_object = self
                .buffer
                .get(payload_start)
                .map_or(true, |&b| b == b'{');
            if declared != 0 && declared <= self.max_frame_len && opens_object {
                return pos;
            }
            pos += 1;
        }
        pos.max(from).min(len)
    }
}

/// Wraps an outbound payload according to `mode`.
///
/// # Errors
///
/// Returns [`ProtocolError::FrameTooLarge`] when a length-prefixed payload
/// would exceed [`MAX_FRAME_LEN`].
///
/// # Examples
///
/// ```rust
/// use cctv_core::protocol::framing::{encode_frame, FramingMode};
///
/// let framed = encode_frame(br#"{"request_id":4}"#, FramingMode::LengthPrefixedBinary).unwrap();
/// assert_eq!(&framed[..4], &[0, 0, 0, 16]);
///
/// let line = encode_frame(br#"{"request_id":4}"#, FramingMode::LineDelimitedJson).unwrap();
/// assert_eq!(line.last(), Some(&b'\n'));
/// ```
pub fn encode_frame(payload: &[u8], mode: FramingMode) -> Result<Vec<u8>, ProtocolError> {
    match mode {
        FramingMode::LineDelimitedJson => {
            let mut buf = Vec::with_capacity(payload.len() + 1);
            buf.extend_from_slice(payload);
            buf.push(b'\n');
            Ok(buf)
        }
        FramingMode::LengthPrefixedBinary => {
            if payload.len() > MAX_FRAME_LEN {
                return Err(ProtocolError::FrameTooLarge {
                    declared: payload.len(),
                    limit: MAX_FRAME_LEN,
                    discarded: 0,
                });
            }
            let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
            buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
            buf.extend_from_slice(payload);
            Ok(buf)
        }
    }
}

fn read_length(bytes: &[u8]) -> usize {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
}

fn trim_ascii_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

// ── Tests ─────────────────────────────────────────────────────────────────────
