//! ClientCommands: builds the outbound requests the monitoring UI issues.
//!
//! Every method turns its arguments into a [`DecodedMessage`] with the right
//! type code and hands it to a [`MessageSink`].  The sink is usually the
//! [`ConnectionManager`](crate::infrastructure::network::ConnectionManager);
//! tests substitute a double.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cctv_core::protocol::messages::{
    DetectionLine, ImageRangeRequest, LoginRequest, OtpLoginRequest, PerpendicularLine, RoadLine,
    SignUpRequest,
};
use cctv_core::{DecodedMessage, MessageType, ProtocolError};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::line_catalog::MatrixCell;

/// Pause between consecutive road-line submissions.
pub const ROAD_LINE_PACING: Duration = Duration::from_millis(100);
/// Pause between consecutive detection-line submissions.
pub const DETECTION_LINE_PACING: Duration = Duration::from_millis(50);

/// Name and crossing mode given to every detection line in a categorized batch.
const DETECTION_LINE_MODE: &str = "BothDirections";

/// Errors returned by [`ClientCommands`].
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Encode(#[from] ProtocolError),

    /// The sink refused or failed to write the message.
    #[error("send failed: {0}")]
    Send(String),
}

/// Somewhere an encoded request can be written.
///
/// Returns the correlation id stamped on the message, if the sink adds one.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, message: DecodedMessage) -> Result<Option<u64>, CommandError>;
}

#[async_trait]
impl<T: MessageSink + ?Sized> MessageSink for Arc<T> {
    async fn send(&self, message: DecodedMessage) -> Result<Option<u64>, CommandError> {
        MessageSink::send(&**self, message).await
    }
}

/// A drawn segment before it is numbered for submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

/// Outcome of [`ClientCommands::submit_categorized_lines`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorizedReport {
    pub success: bool,
    pub message: String,
    pub road_lines_sent: usize,
    pub detection_lines_sent: usize,
}

/// Request builder bound to one sink.
pub struct ClientCommands<S> {
    sink: S,
    road_line_pacing: Duration,
    detection_line_pacing: Duration,
}

impl<S: MessageSink> ClientCommands<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            road_line_pacing: ROAD_LINE_PACING,
            detection_line_pacing: DETECTION_LINE_PACING,
        }
    }

    /// Overrides the pauses between lines of a batch.
    pub fn with_pacing(mut self, road_lines: Duration, detection_lines: Duration) -> Self {
        self.road_line_pacing = road_lines;
        self.detection_line_pacing = detection_lines;
        self
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    // ── Images ────────────────────────────────────────────────────────────────

    /// Requests stored images for `date` (`yyyy-MM-dd`), either one hour or the whole day.
    pub async fn request_images(
        &self,
        date: &str,
        hour: Option<u8>,
    ) -> Result<Option<u64>, CommandError> {
        let range = image_range(date, hour)?;
        info!(
            "requesting images {} .. {}",
            range.start_timestamp, range.end_timestamp
        );
        self.send_data(MessageType::ImageRange, &range).await
    }

    // ── Lines ─────────────────────────────────────────────────────────────────

    pub async fn submit_detection_line(
        &self,
        line: &DetectionLine,
    ) -> Result<Option<u64>, CommandError> {
        debug!("submitting detection line {}", line.index);
        self.send_data(MessageType::SubmitDetectionLine, line).await
    }

    pub async fn request_detection_lines(&self) -> Result<Option<u64>, CommandError> {
        self.send_request(MessageType::DetectionLines).await
    }

    /// Deletes every detection, road and perpendicular line on the server.
    pub async fn delete_all_lines(&self) -> Result<Option<u64>, CommandError> {
        self.send_request(MessageType::DeleteAllLines).await
    }

    pub async fn submit_road_line(&self, line: &RoadLine) -> Result<Option<u64>, CommandError> {
        debug!("submitting road line {}", line.index);
        self.send_data(MessageType::SubmitRoadLine, line).await
    }

    pub async fn submit_perpendicular_line(
        &self,
        line: &PerpendicularLine,
    ) -> Result<Option<u64>, CommandError> {
        self.send_data(MessageType::PerpendicularLine, line).await
    }

    pub async fn request_road_lines(&self) -> Result<Option<u64>, CommandError> {
        self.send_request(MessageType::RoadLines).await
    }

    /// Numbers and submits a batch of drawn lines: all road lines first, then
    /// all detection lines, pausing between each.
    ///
    /// A failed line is logged and skipped; the rest of the batch still goes out.
    pub async fn submit_categorized_lines(
        &self,
        road: &[Segment],
        detection: &[Segment],
    ) -> CategorizedReport {
        let mut road_lines_sent = 0;
        for (i, segment) in road.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.road_line_pacing).await;
            }
            match self.submit_road_line(&road_line(i, segment)).await {
                Ok(_) => road_lines_sent += 1,
                Err(e) => warn!("road line {} not sent: {e}", i + 1),
            }
        }

        let mut detection_lines_sent = 0;
        for (i, segment) in detection.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.detection_line_pacing).await;
            }
            match self.submit_detection_line(&detection_line(i, segment)).await {
                Ok(_) => detection_lines_sent += 1,
                Err(e) => warn!("detection line {} not sent: {e}", i + 1),
            }
        }

        let success = road_lines_sent == road.len() && detection_lines_sent == detection.len();
        let message = if success {
            "Coordinates sent successfully".to_string()
        } else {
            format!(
                "Failed to send coordinates ({}/{} road, {}/{} detection)",
                road_lines_sent,
                road.len(),
                detection_lines_sent,
                detection.len()
            )
        };
        info!("categorized lines: {message}");
        CategorizedReport {
            success,
            message,
            road_lines_sent,
            detection_lines_sent,
        }
    }

    // ── Authentication ────────────────────────────────────────────────────────

    pub async fn login(&self, id: &str, passwd: &str) -> Result<Option<u64>, CommandError> {
        require_non_empty("id", id)?;
        require_non_empty("passwd", passwd)?;
        info!("sending login request for {id}");
        let request = LoginRequest {
            id: id.to_string(),
            passwd: passwd.to_string(),
        };
        self.send_data(MessageType::Login, &request).await
    }

    pub async fn sign_up(
        &self,
        id: &str,
        passwd: &str,
        use_otp: bool,
    ) -> Result<Option<u64>, CommandError> {
        require_non_empty("id", id)?;
        require_non_empty("passwd", passwd)?;
        info!("sending sign-up request for {id} (otp: {use_otp})");
        let request = SignUpRequest {
            id: id.to_string(),
            passwd: passwd.to_string(),
            use_otp,
        };
        self.send_data(MessageType::SignUp, &request).await
    }

    /// Second login step: the one-time code for `id`.
    pub async fn otp_login(&self, id: &str, code: &str) -> Result<Option<u64>, CommandError> {
        require_non_empty("id", id)?;
        if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(CommandError::InvalidArgument(
                "OTP code must be 6 digits".to_string(),
            ));
        }
        let request = OtpLoginRequest {
            id: id.to_string(),
            input: code.to_string(),
        };
        self.send_data(MessageType::OtpLogin, &request).await
    }

    // ── Bounding boxes ────────────────────────────────────────────────────────

    /// Turns server-side bounding-box streaming on or off.
    pub async fn set_bbox_streaming(&self, enabled: bool) -> Result<Option<u64>, CommandError> {
        let message_type = if enabled {
            MessageType::BoundingBoxesOn
        } else {
            MessageType::BoundingBoxesOff
        };
        let mut message = DecodedMessage::request(message_type);
        message
            .fields
            .insert("bbox_enabled".to_string(), Value::Bool(enabled));
        self.sink.send(message).await
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    async fn send_data<T: serde::Serialize + Sync>(
        &self,
        message_type: MessageType,
        data: &T,
    ) -> Result<Option<u64>, CommandError> {
        let message = DecodedMessage::with_data(message_type, data)?;
        self.sink.send(message).await
    }

    async fn send_request(&self, message_type: MessageType) -> Result<Option<u64>, CommandError> {
        self.sink.send(DecodedMessage::request(message_type)).await
    }
}

/// Builds the start/end timestamps for an image request.
///
/// With an hour the range is `{date}THH` to `{date}T{HH+1}`; without one it
/// spans `T00` to `T23`.
pub fn image_range(date: &str, hour: Option<u8>) -> Result<ImageRangeRequest, CommandError> {
    if !is_iso_date(date) {
        return Err(CommandError::InvalidArgument(format!(
            "date must be yyyy-MM-dd, got {date:?}"
        )));
    }
    let (start, end) = match hour {
        Some(h) if h > 23 => {
            return Err(CommandError::InvalidArgument(format!(
                "hour must be 0..=23, got {h}"
            )))
        }
        Some(h) => (format!("{date}T{h:02}"), format!("{date}T{:02}", h + 1)),
        None => (format!("{date}T00"), format!("{date}T23")),
    };
    Ok(ImageRangeRequest {
        start_timestamp: start,
        end_timestamp: end,
    })
}

/// Road line `i` (0-based) of a categorized batch.
pub fn road_line(i: usize, segment: &Segment) -> RoadLine {
    RoadLine {
        index: (i + 1) as u32,
        matrix_num1: MatrixCell::for_road_line_start(i).get(),
        x1: segment.x1,
        y1: segment.y1,
        matrix_num2: MatrixCell::for_road_line_end(i).get(),
        x2: segment.x2,
        y2: segment.y2,
    }
}

/// Detection line `i` (0-based) of a categorized batch.
pub fn detection_line(i: usize, segment: &Segment) -> DetectionLine {
    let index = (i + 1) as u32;
    DetectionLine {
        index,
        x1: segment.x1,
        y1: segment.y1,
        x2: segment.x2,
        y2: segment.y2,
        name: format!("DetectionLine{index}"),
        mode: DETECTION_LINE_MODE.to_string(),
    }
}

fn require_non_empty(name: &str, value: &str) -> Result<(), CommandError> {
    if value.trim().is_empty() {
        return Err(CommandError::InvalidArgument(format!("{name} must not be empty")));
    }
    Ok(())
}

fn is_iso_date(date: &str) -> bool {
    let bytes = date.as_bytes();
    if !date.is_ascii() || bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return false;
    }
    let digits = |range: std::ops::Range<usize>| -> Option<u32> {
        let part = &date[range];
        part.bytes()
            .all(|b| b.is_ascii_digit())
            .then(|| part.parse().ok())
            .flatten()
    };
    matches!(
        (digits(0..4), digits(5..7), digits(8..10)),
        (Some(_), Some(1..=12), Some(1..=31))
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::function;
    use std::sync::Mutex;

    // ── Test doubles ──────────────────────────────────────────────────────────

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<DecodedMessage>>,
        fail_type: Option<MessageType>,
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn send(&self, message: DecodedMessage) -> Result<Option<u64>, CommandError> {
            if self.fail_type.is_some() && message.message_type() == self.fail_type {
                return Err(CommandError::Send("injected failure".to_string()));
            }
            self.sent.lock().unwrap().push(message);
            Ok(None)
        }
    }

    fn commands(sink: RecordingSink) -> ClientCommands<RecordingSink> {
        ClientCommands::new(sink).with_pacing(Duration::ZERO, Duration::ZERO)
    }

    fn segment(n: i32) -> Segment {
        Segment {
            x1: n,
            y1: n + 1,
            x2: n + 2,
            y2: n + 3,
        }
    }

    // ── Image range ───────────────────────────────────────────────────────────

    #[test]
    fn test_image_range_for_single_hour() {
        let range = image_range("2024-05-01", Some(9)).unwrap();

        assert_eq!(range.start_timestamp, "2024-05-01T09");
        assert_eq!(range.end_timestamp, "2024-05-01T10");
    }

    #[test]
    fn test_image_range_without_hour_spans_the_day() {
        let range = image_range("2024-05-01", None).unwrap();

        assert_eq!(range.start_timestamp, "2024-05-01T00");
        assert_eq!(range.end_timestamp, "2024-05-01T23");
    }

    #[test]
    fn test_image_range_last_hour_ends_at_24() {
        let range = image_range("2024-05-01", Some(23)).unwrap();

        assert_eq!(range.end_timestamp, "2024-05-01T24");
    }

    #[test]
    fn test_image_range_rejects_bad_input() {
        assert!(matches!(
            image_range("2024-05-01", Some(24)),
            Err(CommandError::InvalidArgument(_))
        ));
        assert!(image_range("2024/05/01", None).is_err());
        assert!(image_range("2024-13-01", None).is_err());
        assert!(image_range("24-05-01", None).is_err());
    }

    // ── Single requests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_request_images_sends_type_1_with_data() {
        // Arrange
        let mut sink = MockMessageSink::new();
        sink.expect_send()
            .with(function(|msg: &DecodedMessage| {
                msg.type_code == 1
                    && msg.data::<ImageRangeRequest>().ok()
                        == Some(ImageRangeRequest {
                            start_timestamp: "2024-05-01T13".to_string(),
                            end_timestamp: "2024-05-01T14".to_string(),
                        })
            }))
            .times(1)
            .returning(|_| Ok(Some(7)));
        let cmds = ClientCommands::new(sink);

        // Act
        let result = cmds.request_images("2024-05-01", Some(13)).await;

        // Assert
        assert_eq!(result.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_invalid_arguments_never_reach_the_sink() {
        let mut sink = MockMessageSink::new();
        sink.expect_send().times(0);
        let cmds = ClientCommands::new(sink);

        assert!(cmds.request_images("yesterday", None).await.is_err());
        assert!(cmds.login("", "pw").await.is_err());
        assert!(cmds.otp_login("user", "12ab56").await.is_err());
    }

    #[tokio::test]
    async fn test_sink_error_is_propagated() {
        let mut sink = MockMessageSink::new();
        sink.expect_send()
            .returning(|_| Err(CommandError::Send("not connected".to_string())));
        let cmds = ClientCommands::new(sink);

        let result = cmds.request_road_lines().await;

        assert!(matches!(result, Err(CommandError::Send(msg)) if msg == "not connected"));
    }

    #[tokio::test]
    async fn test_bare_requests_carry_only_the_type_code() {
        // Arrange
        let cmds = commands(RecordingSink::default());

        // Act
        cmds.request_detection_lines().await.unwrap();
        cmds.request_road_lines().await.unwrap();
        cmds.delete_all_lines().await.unwrap();

        // Assert
        let sent = cmds.sink().sent.lock().unwrap();
        let codes: Vec<i64> = sent.iter().map(|m| m.type_code).collect();
        assert_eq!(codes, vec![3, 7, 4]);
        assert!(sent.iter().all(|m| m.fields.is_empty()));
    }

    #[tokio::test]
    async fn test_login_payload_uses_passwd_field() {
        let cmds = commands(RecordingSink::default());

        cmds.login("admin", "secret").await.unwrap();

        let sent = cmds.sink().sent.lock().unwrap();
        assert_eq!(sent[0].type_code, 8);
        let data = sent[0].field("data").unwrap();
        assert_eq!(data["id"], "admin");
        assert_eq!(data["passwd"], "secret");
    }

    #[tokio::test]
    async fn test_otp_login_sends_input_field() {
        let cmds = commands(RecordingSink::default());

        cmds.otp_login("admin", "123456").await.unwrap();

        let sent = cmds.sink().sent.lock().unwrap();
        assert_eq!(sent[0].type_code, 22);
        assert_eq!(sent[0].field("data").unwrap()["input"], "123456");
    }

    #[tokio::test]
    async fn test_bbox_streaming_toggles_between_31_and_32() {
        let cmds = commands(RecordingSink::default());

        cmds.set_bbox_streaming(true).await.unwrap();
        cmds.set_bbox_streaming(false).await.unwrap();

        let sent = cmds.sink().sent.lock().unwrap();
        assert_eq!(sent[0].type_code, 31);
        assert_eq!(sent[0].field("bbox_enabled"), Some(&Value::Bool(true)));
        assert_eq!(sent[1].type_code, 32);
        assert_eq!(sent[1].field("bbox_enabled"), Some(&Value::Bool(false)));
    }

    // ── Categorized batch ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_categorized_lines_are_numbered_and_ordered() {
        // Arrange
        let cmds = commands(RecordingSink::default());
        let road = [segment(0), segment(10), segment(20), segment(30), segment(40)];
        let detection = [segment(100), segment(200)];

        // Act
        let report = cmds.submit_categorized_lines(&road, &detection).await;

        // Assert – road lines first, then detection lines
        assert!(report.success);
        assert_eq!((report.road_lines_sent, report.detection_lines_sent), (5, 2));
        let sent = cmds.sink().sent.lock().unwrap();
        let codes: Vec<i64> = sent.iter().map(|m| m.type_code).collect();
        assert_eq!(codes, vec![5, 5, 5, 5, 5, 2, 2]);

        let fifth: RoadLine = sent[4].data().unwrap();
        assert_eq!(fifth.index, 5);
        assert_eq!((fifth.matrix_num1, fifth.matrix_num2), (1, 2));

        let second: DetectionLine = sent[6].data().unwrap();
        assert_eq!(second.index, 2);
        assert_eq!(second.name, "DetectionLine2");
        assert_eq!(second.mode, "BothDirections");
    }

    #[tokio::test]
    async fn test_categorized_lines_continue_after_a_failure() {
        // Arrange – every road line fails
        let cmds = commands(RecordingSink {
            fail_type: Some(MessageType::SubmitRoadLine),
            ..RecordingSink::default()
        });

        // Act
        let report = cmds
            .submit_categorized_lines(&[segment(0), segment(1)], &[segment(2)])
            .await;

        // Assert
        assert!(!report.success);
        assert_eq!(report.road_lines_sent, 0);
        assert_eq!(report.detection_lines_sent, 1);
        assert!(report.message.contains("0/2 road"));
    }

    #[tokio::test]
    async fn test_empty_batch_succeeds_without_sending() {
        let cmds = commands(RecordingSink::default());

        let report = cmds.submit_categorized_lines(&[], &[]).await;

        assert!(report.success);
        assert!(cmds.sink().sent.lock().unwrap().is_empty());
    }
}
