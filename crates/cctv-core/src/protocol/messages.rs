//! Message-type table and typed payload shapes.
//!
//! Every message on the wire is a JSON object carrying an integer
//! `request_id` (servers replying on the bounding-box channel use
//! `response_id` instead).  The integer names the *shape* of the payload, not a
//! particular call: the client sends `{"request_id":3}` to ask for detection
//! lines and the server later pushes `{"request_id":3,"data":[...]}` with the
//! same code.  Nothing pairs a reply with the request that caused it.
//!
//! Payload structs use the exact wire field names (`matrixNum1`, `passwd`,
//! `step1_success`, ...) through `serde` renames so the Rust side can keep
//! snake_case names.

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::protocol::ProtocolError;

// ── Message-type table ────────────────────────────────────────────────────────

/// Numeric message-type tags understood by the client.
///
/// The discriminants are the wire values and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Request images for a time range; the response carries base64 images.
    ImageRange = 1,
    SubmitDetectionLine = 2,
    /// Request (and receive) the saved detection lines.
    DetectionLines = 3,
    DeleteAllLines = 4,
    SubmitRoadLine = 5,
    /// Perpendicular-line coefficients `a` and `b`.
    PerpendicularLine = 6,
    /// Request (and receive) the saved road lines.
    RoadLines = 7,
    Login = 8,
    SignUp = 9,
    /// Image response code used by older servers.
    ImagesLegacy = 10,
    /// Detection-line response code used by older servers.
    DetectionLinesLegacy = 12,
    /// Road-line response code used by older servers.
    RoadLinesLegacy = 16,
    LoginResult = 19,
    SignUpResult = 20,
    OtpLogin = 22,
    OtpLoginResult = 23,
    BoundingBoxesOn = 31,
    BoundingBoxesOff = 32,
    /// Bounding-box push on the length-prefixed channel (`response_id`).
    BoundingBoxes = 200,
}

/// Which side originates a message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
    Both,
}

impl MessageType {
    /// Returns the numeric wire tag.
    pub fn code(self) -> i64 {
        self as u8 as i64
    }

    pub fn direction(self) -> Direction {
        match self {
            Self::ImageRange | Self::DetectionLines | Self::RoadLines => Direction::Both,
            Self::SubmitDetectionLine
            | Self::DeleteAllLines
            | Self::SubmitRoadLine
            | Self::PerpendicularLine
            | Self::Login
            | Self::SignUp
            | Self::OtpLogin
            | Self::BoundingBoxesOn
            | Self::BoundingBoxesOff => Direction::Request,
            Self::ImagesLegacy
            | Self::DetectionLinesLegacy
            | Self::RoadLinesLegacy
            | Self::LoginResult
            | Self::SignUpResult
            | Self::OtpLoginResult
            | Self::BoundingBoxes => Direction::Response,
        }
    }
}

impl TryFrom<i64> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::ImageRange),
            2 => Ok(Self::SubmitDetectionLine),
            3 => Ok(Self::DetectionLines),
            4 => Ok(Self::DeleteAllLines),
            5 => Ok(Self::SubmitRoadLine),
            6 => Ok(Self::PerpendicularLine),
            7 => Ok(Self::RoadLines),
            8 => Ok(Self::Login),
            9 => Ok(Self::SignUp),
            10 => Ok(Self::ImagesLegacy),
            12 => Ok(Self::DetectionLinesLegacy),
            16 => Ok(Self::RoadLinesLegacy),
            19 => Ok(Self::LoginResult),
            20 => Ok(Self::SignUpResult),
            22 => Ok(Self::OtpLogin),
            23 => Ok(Self::OtpLoginResult),
            31 => Ok(Self::BoundingBoxesOn),
            32 => Ok(Self::BoundingBoxesOff),
            200 => Ok(Self::BoundingBoxes),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

// ── Decoded envelope ──────────────────────────────────────────────────────────

/// A JSON message reduced to its type code and remaining top-level fields.
///
/// `fields` never contains the `request_id`, `response_id` or
/// `correlation_id` keys; those are lifted into the struct.  A `type_code`
/// of 0 means the message carried no tag at all (status pushes from older
/// servers are routed by their `"type"` string instead).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedMessage {
    pub type_code: i64,
    pub fields: Map<String, Value>,
    /// Optional request/response correlation id, independent of `type_code`.
    pub correlation_id: Option<u64>,
}

impl DecodedMessage {
    pub fn new(type_code: i64, fields: Map<String, Value>) -> Self {
        Self {
            type_code,
            fields,
            correlation_id: None,
        }
    }

    /// A bare request with no payload, e.g. `{"request_id":3}`.
    pub fn request(message_type: MessageType) -> Self {
        Self::new(message_type.code(), Map::new())
    }

    /// A request whose payload is nested under `data`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Encode`] if `data` does not serialize to JSON.
    pub fn with_data<T: Serialize>(message_type: MessageType, data: &T) -> Result<Self, ProtocolError> {
        let value = serde_json::to_value(data).map_err(|e| ProtocolError::Encode(e.to_string()))?;
        let mut fields = Map::new();
        fields.insert("data".to_string(), value);
        Ok(Self::new(message_type.code(), fields))
    }

    /// Attaches a correlation id.
    pub fn with_correlation_id(mut self, id: u64) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Looks the type code up in the message table.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::try_from(self.type_code).ok()
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Deserializes the `data` member into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] when `data` is missing or
    /// does not match `T`.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        let data = self
            .fields
            .get("data")
            .ok_or_else(|| ProtocolError::MalformedPayload("missing \"data\" field".to_string()))?;
        T::deserialize(data).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
    }

    /// Deserializes the whole top-level object into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] when the fields do not match `T`.
    pub fn body<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        T::deserialize(&Value::Object(self.fields.clone()))
            .map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
    }
}

// ── Request payloads ──────────────────────────────────────────────────────────

/// Payload of [`MessageType::ImageRange`] requests.
///
/// Timestamps use the server's hour-granular `yyyy-MM-ddTHH` format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRangeRequest {
    pub start_timestamp: String,
    pub end_timestamp: String,
}

/// A detection line drawn over the video frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionLine {
    pub index: u32,
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    #[serde(default)]
    pub name: String,
    /// Counting direction, e.g. `"BothDirections"`.
    #[serde(default)]
    pub mode: String,
}

/// A road (reference) line anchored to two calibration matrix cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoadLine {
    pub index: u32,
    #[serde(rename = "matrixNum1")]
    pub matrix_num1: i32,
    pub x1: i32,
    pub y1: i32,
    #[serde(rename = "matrixNum2")]
    pub matrix_num2: i32,
    pub x2: i32,
    pub y2: i32,
}

/// Line-equation coefficients of a line perpendicular to a road line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerpendicularLine {
    pub index: u32,
    pub a: f64,
    pub b: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub id: String,
    pub passwd: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignUpRequest {
    pub id: String,
    pub passwd: String,
    pub use_otp: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpLoginRequest {
    pub id: String,
    /// The one-time code typed by the user.
    pub input: String,
}

// ── Response payloads ─────────────────────────────────────────────────────────

/// One entry of an image response; `image` is base64, optionally as a data URL.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageEntry {
    #[serde(alias = "image_data")]
    pub image: String,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoginResponse {
    #[serde(rename = "step1_success", default, deserialize_with = "flexible_bool")]
    pub success: bool,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub requires_otp: bool,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SignUpResponse {
    #[serde(rename = "sign_up_success", default, deserialize_with = "flexible_bool")]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    /// SVG markup of the OTP enrolment QR code.
    #[serde(default)]
    pub qr_code_svg: Option<String>,
    #[serde(default)]
    pub otp_uri: Option<String>,
    #[serde(default)]
    pub recovery_codes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OtpLoginResponse {
    #[serde(rename = "final_login_success", default, deserialize_with = "flexible_bool")]
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

/// One detected object on the bounding-box channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BoundingBox {
    pub id: i64,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BoundingBoxFrame {
    #[serde(default)]
    pub bboxes: Vec<BoundingBox>,
    /// Capture time in milliseconds since the Unix epoch, when sent.
    #[serde(default)]
    pub timestamp: Option<u64>,
}

/// Accepts `true`/`false`, integers (non-zero is true) and the strings
/// `"true"`/`"1"`.  Servers send result flags as either JSON bools or ints.
pub(crate) fn flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::Number(n) => Ok(n.as_f64().map_or(false, |v| v != 0.0)),
        Value::String(s) => Ok(matches!(s.trim(), "true" | "1")),
        Value::Null => Ok(false),
        other => Err(de::Error::custom(format!("expected a boolean flag, got {other}"))),
    }
}

/// Reads an optional success flag with the same leniency as [`flexible_bool`].
pub(crate) fn success_flag(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::String(s) => Some(matches!(s.trim(), "true" | "1")),
        _ => None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
