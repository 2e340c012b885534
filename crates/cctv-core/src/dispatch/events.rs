//! Typed application events produced by the [`Dispatcher`](super::Dispatcher).

use crate::protocol::messages::{
    BoundingBoxFrame, DecodedMessage, DetectionLine, LoginResponse, MessageType, OtpLoginResponse,
    RoadLine, SignUpResponse,
};

/// One image from an image-range response, already base64-decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedImage {
    /// Server timestamp string as sent, e.g. `2024-05-01T13:45:10`.
    pub timestamp: String,
    pub bytes: Vec<u8>,
}

/// What a decoded message means to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Images for a requested time range.  `skipped` counts entries whose
    /// base64 payload could not be decoded.
    ImagesReceived {
        images: Vec<ReceivedImage>,
        skipped: usize,
    },
    DetectionLinesReceived(Vec<DetectionLine>),
    RoadLinesReceived(Vec<RoadLine>),
    LoginResult(LoginResponse),
    SignUpResult(SignUpResponse),
    OtpLoginResult(OtpLoginResponse),
    BoundingBoxes(BoundingBoxFrame),
    /// The server echoed a request-only code, e.g. confirming submitted coordinates.
    Acknowledged {
        message_type: MessageType,
        success: Option<bool>,
        message: Option<String>,
    },
    /// Free-form status text pushed by the server.
    Status { message: String },
    /// The server reported a failure.
    ApplicationError {
        type_code: i64,
        message: String,
        error_code: Option<String>,
    },
    /// A known type code whose payload does not match its schema.
    Malformed {
        message_type: MessageType,
        reason: String,
    },
    /// A message with a type code the table does not know.
    Raw(DecodedMessage),
}

impl Event {
    /// Whether the event reports a failed operation.
    ///
    /// Failed logins and rejected submissions are still delivered as their
    /// typed event; this is the single place that interprets their flags.
    pub fn is_failure(&self) -> bool {
        match self {
            Self::LoginResult(r) => !r.success,
            Self::SignUpResult(r) => !r.success,
            Self::OtpLoginResult(r) => !r.success,
            Self::Acknowledged { success, .. } => *success == Some(false),
            Self::ApplicationError { .. } | Self::Malformed { .. } => true,
            _ => false,
        }
    }

    /// Short event name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ImagesReceived { .. } => "images_received",
            Self::DetectionLinesReceived(_) => "detection_lines_received",
            Self::RoadLinesReceived(_) => "road_lines_received",
            Self::LoginResult(_) => "login_result",
            Self::SignUpResult(_) => "sign_up_result",
            Self::OtpLoginResult(_) => "otp_login_result",
            Self::BoundingBoxes(_) => "bounding_boxes",
            Self::Acknowledged { .. } => "acknowledged",
            Self::Status { .. } => "status",
            Self::ApplicationError { .. } => "application_error",
            Self::Malformed { .. } => "malformed",
            Self::Raw(_) => "raw",
        }
    }
}
