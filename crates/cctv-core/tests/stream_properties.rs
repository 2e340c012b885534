//! Integration tests for framing and decoding through the public API.
//!
//! These exercise `FrameDecoder`, `MessageStream` and the codec together the
//! way the client's read loop drives them: bytes arrive in arbitrary chunks
//! and messages come out in order.

use cctv_core::protocol::messages::{MessageType, RoadLine};
use cctv_core::{
    decode_frame, encode_message, DecodedMessage, Frame, FrameDecoder, FramingMode, MessageStream,
    ProtocolError,
};
use serde_json::{json, Map, Value};

/// A small, varied set of messages covering nested data, arrays and unicode.
fn sample_messages() -> Vec<DecodedMessage> {
    let road = RoadLine {
        index: 1,
        matrix_num1: 1,
        x1: 10,
        y1: 20,
        matrix_num2: 2,
        x2: 30,
        y2: 40,
    };
    vec![
        DecodedMessage::request(MessageType::DetectionLines),
        DecodedMessage::with_data(MessageType::SubmitRoadLine, &road).expect("encode"),
        DecodedMessage::new(19, object(json!({"step1_success": 1, "message": "환영합니다"}))),
        DecodedMessage::new(200, object(json!({"bboxes": [{"id": 1, "x": 0, "y": 0, "width": 5, "height": 5}]}))),
        DecodedMessage::request(MessageType::DeleteAllLines).with_correlation_id(9),
    ]
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

fn encode_all(messages: &[DecodedMessage], mode: FramingMode) -> Vec<u8> {
    messages
        .iter()
        .flat_map(|m| encode_message(m, mode).expect("encode"))
        .collect()
}

/// Feeds `wire` in pieces produced by `split` and returns every frame.
fn feed_in_pieces(mode: FramingMode, wire: &[u8], mut split: impl FnMut() -> usize) -> Vec<Frame> {
    let mut decoder = FrameDecoder::new(mode);
    let mut frames = Vec::new();
    let mut pos = 0;
    while pos < wire.len() {
        let end = (pos + split().max(1)).min(wire.len());
        for result in decoder.feed(&wire[pos..end]) {
            frames.push(result.expect("valid stream must not produce errors"));
        }
        pos = end;
    }
    assert_eq!(decoder.buffered_len(), 0, "no bytes may be left over");
    frames
}

// ── Chunk-boundary independence ──────────────────────────────────────────────

#[test]
fn test_every_fixed_chunk_size_reassembles_same_frames() {
    for mode in [FramingMode::LineDelimitedJson, FramingMode::LengthPrefixedBinary] {
        // Arrange
        let messages = sample_messages();
        let wire = encode_all(&messages, mode);
        let reference = feed_in_pieces(mode, &wire, || wire.len());

        // Act / Assert – one byte at a time through the whole buffer at once
        for chunk in 1..=wire.len() {
            let frames = feed_in_pieces(mode, &wire, || chunk);
            assert_eq!(frames, reference, "mode {mode:?}, chunk size {chunk}");
        }

        let decoded: Vec<DecodedMessage> = reference
            .iter()
            .map(|f| decode_frame(f).expect("decode"))
            .collect();
        assert_eq!(decoded, messages);
    }
}

#[test]
fn test_irregular_chunk_sizes_reassemble_same_frames() {
    for mode in [FramingMode::LineDelimitedJson, FramingMode::LengthPrefixedBinary] {
        // Arrange
        let messages = sample_messages();
        let wire = encode_all(&messages, mode);
        let reference = feed_in_pieces(mode, &wire, || wire.len());

        for seed in 1..50u64 {
            // Deterministic linear-congruential split sizes in 1..=17.
            let mut state = seed;
            let frames = feed_in_pieces(mode, &wire, || {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((state >> 33) % 17 + 1) as usize
            });

            assert_eq!(frames, reference, "mode {mode:?}, seed {seed}");
        }
    }
}

// ── Malformed line recovery ──────────────────────────────────────────────────

#[test]
fn test_malformed_line_between_valid_lines_is_reported_in_order() {
    // Arrange
    let mut stream = MessageStream::new(FramingMode::LineDelimitedJson);
    let wire = b"{\"request_id\":3}\n{\"request_id\":,}\n{\"request_id\":7,\"data\":[]}\n";

    // Act
    let out = stream.feed(wire);

    // Assert – exactly two messages and one error, in stream order
    assert_eq!(out.len(), 3);
    assert_eq!(out[0].as_ref().map(|m| m.type_code), Ok(3));
    assert!(matches!(out[1], Err(ProtocolError::MalformedJson { .. })));
    assert_eq!(out[2].as_ref().map(|m| m.type_code), Ok(7));
}

// ── Oversized header resync ──────────────────────────────────────────────────

#[test]
fn test_oversized_length_discards_corrupt_buffer_then_recovers() {
    // Arrange
    let mut stream = MessageStream::new(FramingMode::LengthPrefixedBinary);
    let mut corrupt = (11u32 * 1024 * 1024).to_be_bytes().to_vec();
    corrupt.extend_from_slice(b"{\"request_id\":3}");

    // Act
    let first = stream.feed(&corrupt);
    let good = encode_message(
        &DecodedMessage::request(MessageType::RoadLines),
        FramingMode::LengthPrefixedBinary,
    )
    .expect("encode");
    let second = stream.feed(&good);

    // Assert
    assert_eq!(first.len(), 1);
    assert!(matches!(
        first[0],
        Err(ProtocolError::FrameTooLarge { discarded, .. }) if discarded == corrupt.len()
    ));
    assert_eq!(stream.buffered_len(), 0);
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].as_ref().map(|m| m.type_code), Ok(7));
}

// ── Round trip ───────────────────────────────────────────────────────────────

#[test]
fn test_type_five_round_trip_is_identical() {
    for mode in [FramingMode::LineDelimitedJson, FramingMode::LengthPrefixedBinary] {
        // Arrange
        let original = DecodedMessage::new(
            5,
            object(json!({"index":1,"matrixNum1":1,"x1":10,"y1":20,"matrixNum2":2,"x2":30,"y2":40})),
        );

        // Act
        let wire = encode_message(&original, mode).expect("encode");
        let mut stream = MessageStream::new(mode);
        let out = stream.feed(&wire);

        // Assert
        assert_eq!(out, vec![Ok(original.clone())]);
    }
}
