//! JSON codec between [`Frame`]s and [`DecodedMessage`]s.
//!
//! Outbound messages are serialized as one compact JSON object:
//!
//! ```text
//! {"request_id":5,"data":{"index":1,"matrixNum1":1,...}}
//! ```
//!
//! and then wrapped by [`encode_frame`] for the channel's framing mode.
//! Inbound frames go the other way.  The type code is read from `request_id`,
//! falling back to `response_id` when `request_id` is absent or zero.

use serde_json::{Map, Value};
use tracing::debug;

use crate::protocol::framing::{encode_frame, Frame, FrameDecoder, FramingMode, ResyncStrategy};
use crate::protocol::messages::DecodedMessage;
use crate::protocol::ProtocolError;

pub const TYPE_CODE_FIELD: &str = "request_id";
pub const RESPONSE_CODE_FIELD: &str = "response_id";
pub const CORRELATION_FIELD: &str = "correlation_id";

/// Longest slice of a malformed frame echoed back in [`ProtocolError::MalformedJson`].
const RAW_PREVIEW_LEN: usize = 256;

// ── Public API ────────────────────────────────────────────────────────────────

/// Serializes `msg` to compact JSON without any framing.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails.
pub fn encode_payload(msg: &DecodedMessage) -> Result<Vec<u8>, ProtocolError> {
    let mut object = Map::with_capacity(msg.fields.len() + 2);
    object.insert(TYPE_CODE_FIELD.to_string(), Value::from(msg.type_code));
    for (key, value) in &msg.fields {
        if key != TYPE_CODE_FIELD && key != RESPONSE_CODE_FIELD && key != CORRELATION_FIELD {
            object.insert(key.clone(), value.clone());
        }
    }
    if let Some(id) = msg.correlation_id {
        object.insert(CORRELATION_FIELD.to_string(), Value::from(id));
    }
    serde_json::to_vec(&Value::Object(object)).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Serializes and frames `msg` for a channel using `mode`.
///
/// # Errors
///
/// Returns [`ProtocolError`] if serialization or framing fails.
///
/// # Examples
///
/// ```rust
/// use cctv_core::protocol::{decode_payload, encode_message, FramingMode, MessageType};
/// use cctv_core::DecodedMessage;
///
/// let msg = DecodedMessage::request(MessageType::DeleteAllLines);
/// let bytes = encode_message(&msg, FramingMode::LineDelimitedJson).unwrap();
/// assert_eq!(bytes, b"{\"request_id\":4}\n");
/// assert_eq!(decode_payload(&bytes[..bytes.len() - 1]).unwrap(), msg);
/// ```
pub fn encode_message(msg: &DecodedMessage, mode: FramingMode) -> Result<Vec<u8>, ProtocolError> {
    let payload = encode_payload(msg)?;
    encode_frame(&payload, mode)
}

/// Parses one frame into a [`DecodedMessage`].
///
/// # Errors
///
/// Returns [`ProtocolError`] if the frame is not a JSON object or its type
/// code is not an integer.
pub fn decode_frame(frame: &Frame) -> Result<DecodedMessage, ProtocolError> {
    decode_payload(&frame.bytes)
}

/// Parses raw JSON bytes into a [`DecodedMessage`].
///
/// # Errors
///
/// See [`decode_frame`].
pub fn decode_payload(bytes: &[u8]) -> Result<DecodedMessage, ProtocolError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| ProtocolError::MalformedJson {
        reason: e.to_string(),
        raw: preview(bytes),
    })?;

    let Value::Object(mut fields) = value else {
        return Err(ProtocolError::NotAnObject);
    };

    let request_id = take_code(&mut fields, TYPE_CODE_FIELD)?;
    let response_id = take_code(&mut fields, RESPONSE_CODE_FIELD)?;
    let type_code = match (request_id, response_id) {
        (Some(code), _) if code != 0 => code,
        (_, Some(code)) => code,
        (Some(code), None) => code,
        (None, None) => 0,
    };

    let correlation_id = match fields.remove(CORRELATION_FIELD) {
        Some(Value::Number(n)) => n.as_u64(),
        _ => None,
    };

    Ok(DecodedMessage {
        type_code,
        fields,
        correlation_id,
    })
}

/// A [`FrameDecoder`] and JSON decoding fused into one step.
///
/// Each call to [`feed`](Self::feed) returns the messages and per-frame errors
/// completed by the new bytes, in stream order.
#[derive(Debug)]
pub struct MessageStream {
    decoder: FrameDecoder,
}

impl MessageStream {
    pub fn new(mode: FramingMode) -> Self {
        Self {
            decoder: FrameDecoder::new(mode),
        }
    }

    pub fn with_resync(mode: FramingMode, resync: ResyncStrategy) -> Self {
        Self {
            decoder: FrameDecoder::new(mode).with_resync(resync),
        }
    }

    pub fn mode(&self) -> FramingMode {
        self.decoder.mode()
    }

    pub fn buffered_len(&self) -> usize {
        self.decoder.buffered_len()
    }

    /// Drops any partially received frame, e.g. after the socket reconnects.
    pub fn reset(&mut self) {
        self.decoder.clear();
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<DecodedMessage, ProtocolError>> {
        self.decoder
            .feed(bytes)
            .into_iter()
            .map(|frame| -> Result<DecodedMessage, ProtocolError> {
                let msg = decode_frame(&frame?)?;
                debug!("decoded message type {}", msg.type_code);
                Ok(msg)
            })
            .collect()
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn take_code(fields: &mut Map<String, Value>, key: &str) -> Result<Option<i64>, ProtocolError> {
    match fields.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| ProtocolError::InvalidTypeCode(n.to_string())),
        Some(other) => Err(ProtocolError::InvalidTypeCode(other.to_string())),
    }
}

fn preview(bytes: &[u8]) -> String {
    let end = bytes.len().min(RAW_PREVIEW_LEN);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::MessageType;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_decode_reads_request_id_and_strips_it_from_fields() {
        // Arrange
        let bytes = br#"{"request_id":3,"data":[]}"#;

        // Act
        let msg = decode_payload(bytes).expect("decode");

        // Assert
        assert_eq!(msg.type_code, 3);
        assert_eq!(msg.fields, object(json!({"data": []})));
    }

    #[test]
    fn test_decode_falls_back_to_response_id() {
        let msg = decode_payload(br#"{"response_id":200,"bboxes":[]}"#).expect("decode");

        assert_eq!(msg.type_code, 200);
        assert!(!msg.fields.contains_key("response_id"));
    }

    #[test]
    fn test_decode_zero_request_id_uses_response_id() {
        let msg = decode_payload(br#"{"request_id":0,"response_id":200}"#).expect("decode");

        assert_eq!(msg.type_code, 200);
    }

    #[test]
    fn test_decode_untagged_message_has_type_code_zero() {
        let msg = decode_payload(br#"{"type":"status_update","message":"ready"}"#).expect("decode");

        assert_eq!(msg.type_code, 0);
        assert_eq!(msg.field("message"), Some(&json!("ready")));
    }

    #[test]
    fn test_decode_rejects_non_object() {
        assert_eq!(decode_payload(b"[1,2,3]"), Err(ProtocolError::NotAnObject));
    }

    #[test]
    fn test_decode_rejects_string_type_code() {
        assert!(matches!(
            decode_payload(br#"{"request_id":"five"}"#),
            Err(ProtocolError::InvalidTypeCode(_))
        ));
    }

    #[test]
    fn test_decode_malformed_json_keeps_raw_preview() {
        let result = decode_payload(b"{not json");

        match result {
            Err(ProtocolError::MalformedJson { raw, .. }) => assert_eq!(raw, "{not json"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_encode_places_correlation_id_on_the_wire() {
        // Arrange
        let msg = DecodedMessage::request(MessageType::RoadLines).with_correlation_id(42);

        // Act
        let bytes = encode_payload(&msg).expect("encode");
        let value: Value = serde_json::from_slice(&bytes).expect("json");

        // Assert
        assert_eq!(value, json!({"request_id": 7, "correlation_id": 42}));
        assert_eq!(decode_payload(&bytes).expect("decode"), msg);
    }

    #[test]
    fn test_encode_tag_fields_cannot_be_overridden_by_fields() {
        let mut fields = Map::new();
        fields.insert("request_id".into(), json!(99));
        let msg = DecodedMessage::new(4, fields);

        let value: Value = serde_json::from_slice(&encode_payload(&msg).expect("encode")).expect("json");

        assert_eq!(value, json!({"request_id": 4}));
    }

    #[test]
    fn test_message_stream_reports_errors_in_order() {
        // Arrange
        let mut stream = MessageStream::new(FramingMode::LineDelimitedJson);

        // Act
        let out = stream.feed(b"{\"request_id\":3}\n{broken\n{\"request_id\":7}\n");

        // Assert
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].as_ref().map(|m| m.type_code), Ok(3));
        assert!(matches!(out[1], Err(ProtocolError::MalformedJson { .. })));
        assert_eq!(out[2].as_ref().map(|m| m.type_code), Ok(7));
    }

    #[test]
    fn test_message_stream_reset_drops_partial_frame() {
        let mut stream = MessageStream::new(FramingMode::LengthPrefixedBinary);
        stream.feed(&[0, 0, 0, 9, b'{']);

        stream.reset();

        assert_eq!(stream.buffered_len(), 0);
    }
}
