//! Protocol module: stream framing, the JSON codec and the message-type table.

pub mod codec;
pub mod framing;
pub mod messages;
pub mod sequence;

use thiserror::Error;

pub use codec::{decode_frame, decode_payload, encode_message, encode_payload, MessageStream};
pub use framing::{encode_frame, Frame, FrameDecoder, FramingMode, ResyncStrategy};
pub use messages::*;
pub use sequence::CorrelationCounter;

/// Errors raised while framing or decoding the byte stream.
///
/// Every variant describes a problem with one frame (or one read cycle) and is
/// recoverable: the decoder keeps running and later frames are still yielded.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProtocolError {
    /// A length header declared more bytes than the sanity ceiling allows.
    ///
    /// `discarded` is how many buffered bytes were thrown away to resync.
    #[error("frame length {declared} exceeds limit of {limit} bytes; discarded {discarded} buffered bytes")]
    FrameTooLarge {
        declared: usize,
        limit: usize,
        discarded: usize,
    },

    /// A length header declared a zero-length payload.
    #[error("zero-length frame header skipped")]
    EmptyFrame,

    /// The frame is not valid UTF-8 JSON.
    #[error("malformed JSON frame: {reason}")]
    MalformedJson { reason: String, raw: String },

    /// The frame parsed as JSON but is not an object.
    #[error("frame is valid JSON but not an object")]
    NotAnObject,

    /// `request_id` / `response_id` is present but not an integer.
    #[error("type code field is not an integer: {0}")]
    InvalidTypeCode(String),

    /// The numeric type code has no entry in the message table.
    #[error("unknown message type: {0}")]
    UnknownMessageType(i64),

    /// A known message's payload does not match its schema.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// An outbound message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(String),
}
