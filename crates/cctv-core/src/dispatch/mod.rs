//! Routing of decoded messages to typed application events.
//!
//! The [`Dispatcher`] owns the only interpretation of numeric type codes.  It
//! never drops a message: unknown codes come back as [`Event::Raw`] and
//! payloads that do not fit their code's schema come back as
//! [`Event::Malformed`], so the caller can always see what the server sent.
//!
//! # Routing order
//!
//! 1. Untyped legacy pushes are recognised by their `"type"` string
//!    (`"error_response"`, `"status_update"`), whatever their code.  Any
//!    message carrying an `error_code` is an error as well.
//! 2. Otherwise the code is looked up in [`MessageType`].
//! 3. Anything else is [`Event::Raw`].

mod events;

pub use events::{Event, ReceivedImage};

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::protocol::messages::{
    success_flag, BoundingBoxFrame, DecodedMessage, DetectionLine, ImageEntry, LoginResponse,
    MessageType, OtpLoginResponse, RoadLine, SignUpResponse,
};
use crate::protocol::ProtocolError;

/// Maps decoded messages to [`Event`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct Dispatcher;

impl Dispatcher {
    pub fn new() -> Self {
        Self
    }

    /// Routes one decoded message.
    pub fn route(&self, msg: DecodedMessage) -> Event {
        if let Some(event) = route_by_envelope(&msg) {
            return event;
        }

        let message_type = match MessageType::try_from(msg.type_code) {
            Ok(t) => t,
            Err(_) => {
                debug!("no route for type code {}; surfacing raw message", msg.type_code);
                return Event::Raw(msg);
            }
        };

        let routed = match message_type {
            MessageType::ImageRange | MessageType::ImagesLegacy => images(&msg),
            MessageType::DetectionLines | MessageType::DetectionLinesLegacy => msg
                .data::<Vec<DetectionLine>>()
                .map(Event::DetectionLinesReceived),
            MessageType::RoadLines | MessageType::RoadLinesLegacy => {
                msg.data::<Vec<RoadLine>>().map(Event::RoadLinesReceived)
            }
            MessageType::LoginResult => msg.body::<LoginResponse>().map(Event::LoginResult),
            MessageType::SignUpResult => msg.body::<SignUpResponse>().map(Event::SignUpResult),
            MessageType::OtpLoginResult => msg.body::<OtpLoginResponse>().map(Event::OtpLoginResult),
            MessageType::BoundingBoxes => msg.body::<BoundingBoxFrame>().map(Event::BoundingBoxes),
            MessageType::SubmitDetectionLine
            | MessageType::DeleteAllLines
            | MessageType::SubmitRoadLine
            | MessageType::PerpendicularLine
            | MessageType::Login
            | MessageType::SignUp
            | MessageType::OtpLogin
            | MessageType::BoundingBoxesOn
            | MessageType::BoundingBoxesOff => Ok(acknowledgement(message_type, &msg)),
        };

        routed.unwrap_or_else(|err| {
            warn!("payload for {message_type:?} did not match its schema: {err}");
            Event::Malformed {
                message_type,
                reason: err.to_string(),
            }
        })
    }
}

fn route_by_envelope(msg: &DecodedMessage) -> Option<Event> {
    let text = |key: &str| {
        msg.field(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let application_error = || Event::ApplicationError {
        type_code: msg.type_code,
        message: text("message"),
        error_code: msg.field("error_code").and_then(error_code_text),
    };
    match msg.field("type").and_then(Value::as_str) {
        Some("status_update") => {
            // Pushes without a message still carry the bare status.
            let message = match text("message") {
                m if m.is_empty() => text("status"),
                m => m,
            };
            Some(Event::Status { message })
        }
        Some("error_response") => Some(application_error()),
        _ if msg.fields.contains_key("error_code") => Some(application_error()),
        _ => None,
    }
}

/// Servers send `error_code` as a string or a number.
fn error_code_text(code: &Value) -> Option<String> {
    match code {
        Value::Null => None,
        Value::String(code) => Some(code.clone()),
        other => Some(other.to_string()),
    }
}

fn images(msg: &DecodedMessage) -> Result<Event, ProtocolError> {
    // Older servers nest the list under "images" instead of "data".
    let entries: Vec<ImageEntry> = match msg.field("images") {
        Some(list) if !msg.fields.contains_key("data") => Vec::<ImageEntry>::deserialize(list)
            .map_err(|e| ProtocolError::MalformedPayload(e.to_string()))?,
        _ => msg.data()?,
    };

    let mut images = Vec::with_capacity(entries.len());
    let mut skipped = 0;
    for entry in entries {
        match decode_image_base64(&entry.image) {
            Ok(bytes) if !bytes.is_empty() => images.push(ReceivedImage {
                timestamp: entry.timestamp,
                bytes,
            }),
            Ok(_) => skipped += 1,
            Err(e) => {
                warn!("skipping image {}: invalid base64 ({e})", entry.timestamp);
                skipped += 1;
            }
        }
    }
    Ok(Event::ImagesReceived { images, skipped })
}

fn acknowledgement(message_type: MessageType, msg: &DecodedMessage) -> Event {
    Event::Acknowledged {
        message_type,
        success: success_flag(msg.field("success")),
        message: msg.field("message").and_then(Value::as_str).map(str::to_string),
    }
}

/// Decodes a base64 image, accepting an optional `data:image/...;base64,` prefix.
pub fn decode_image_base64(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let text = text.trim();
    let payload = match text.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map_or(rest, |(_, data)| data),
        None => text,
    };
    STANDARD.decode(payload)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
