//! Capture session model
//!
//! A [`CaptureSession`] is owned by exactly one orchestrator loop task. It is
//! created after validation succeeds and dropped once the artifact has been
//! handed off (or immediately, if nothing was captured).

use crate::error::SessionError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Floor for the pause between page turns
pub const MIN_INTER_PAGE_DELAY_MS: u64 = 500;

/// Largest accepted zoom factor
pub const MAX_ZOOM_FACTOR: f64 = 5.0;

/// Which way the viewer pages forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    /// Right-to-left books: the next page is to the left
    ForwardIsLeft,
    /// Left-to-right books: the next page is to the right
    #[default]
    ForwardIsRight,
}

impl Direction {
    /// The opposite paging direction
    pub fn reversed(self) -> Self {
        match self {
            Direction::ForwardIsLeft => Direction::ForwardIsRight,
            Direction::ForwardIsRight => Direction::ForwardIsLeft,
        }
    }
}

/// Inclusive, 1-indexed page range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    /// First page to capture
    pub start: u32,
    /// Last page to capture
    pub end: u32,
}

impl PageRange {
    /// Create a range; not validated
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Number of pages in the range
    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start) + 1
    }

    /// Always false for a validated range
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// Whether `page` lies inside the range
    pub fn contains(&self, page: u32) -> bool {
        (self.start..=self.end).contains(&page)
    }
}

/// Width/height pair where zero means "not set"
///
/// Used for both the crop and the resize spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Dimensions {
    /// Width in pixels (0 = unset)
    #[serde(default)]
    pub width: u32,
    /// Height in pixels (0 = unset)
    #[serde(default)]
    pub height: u32,
}

impl Dimensions {
    /// Create a new spec
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A spec is active when either dimension is nonzero
    pub fn is_set(&self) -> bool {
        self.width > 0 || self.height > 0
    }
}

/// Parameters of a `startCapture` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Pages to capture
    pub page_range: PageRange,
    /// Paging direction of the viewer
    #[serde(default)]
    pub direction: Direction,
    /// Device scale factor applied during capture (1.0 = none)
    #[serde(default = "default_zoom")]
    pub zoom_factor: f64,
    /// Stabilization pause after each page turn
    #[serde(default = "default_delay")]
    pub inter_page_delay_ms: u64,
    /// Center-crop spec
    #[serde(default)]
    pub crop_spec: Dimensions,
    /// Downscale spec
    #[serde(default)]
    pub resize_spec: Dimensions,
}

fn default_zoom() -> f64 {
    1.0
}

fn default_delay() -> u64 {
    1000
}

impl SessionConfig {
    /// Config for `start..=end` with all other fields defaulted
    pub fn for_range(start: u32, end: u32) -> Self {
        Self {
            page_range: PageRange::new(start, end),
            direction: Direction::default(),
            zoom_factor: default_zoom(),
            inter_page_delay_ms: default_delay(),
            crop_spec: Dimensions::default(),
            resize_spec: Dimensions::default(),
        }
    }

    /// Reject configurations that must never start a session
    pub fn validate(&self) -> Result<(), SessionError> {
        let PageRange { start, end } = self.page_range;
        if start == 0 || start > end {
            return Err(SessionError::InvalidPageRange { start, end });
        }
        if self.inter_page_delay_ms < MIN_INTER_PAGE_DELAY_MS {
            return Err(SessionError::DelayTooShort {
                actual: self.inter_page_delay_ms,
                minimum: MIN_INTER_PAGE_DELAY_MS,
            });
        }
        if !self.zoom_factor.is_finite()
            || self.zoom_factor < 1.0
            || self.zoom_factor > MAX_ZOOM_FACTOR
        {
            return Err(SessionError::InvalidZoom(self.zoom_factor));
        }
        Ok(())
    }

    /// Whether captures should change the device scale factor
    pub fn zoom_enabled(&self) -> bool {
        self.zoom_factor > 1.0
    }
}

/// Orchestrator state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    /// No session
    #[default]
    Idle,
    /// Probe injection and surface checks
    Initializing,
    /// Bringing the viewer to the first requested page
    NavigatingToStart,
    /// Turning to the next page
    Advancing,
    /// Polling the readiness probe
    AwaitingReady,
    /// Taking the screenshot
    Capturing,
    /// Blank-suspect classification
    Verifying,
    /// Assembly and delivery
    Completing,
    /// Stop requested and observed
    Stopping,
    /// Unrecoverable error
    Failed,
}

impl SessionStatus {
    /// States during which a session holds the surface
    pub fn is_active(self) -> bool {
        !matches!(self, SessionStatus::Idle | SessionStatus::Failed)
    }
}

/// One captured page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedFrame {
    /// Position in capture order, starting at 0
    pub index: usize,
    /// Viewer page the frame was taken from
    pub page: u32,
    /// Encoded image bytes as produced by the screenshot call
    #[serde(serialize_with = "encode_b64", deserialize_with = "decode_b64")]
    pub data: Vec<u8>,
}

impl CapturedFrame {
    /// Create a frame
    pub fn new(index: usize, page: u32, data: Vec<u8>) -> Self {
        Self { index, page, data }
    }

    /// Encoded payload size in bytes
    pub fn encoded_len(&self) -> usize {
        self.data.len()
    }
}

fn encode_b64<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&BASE64.encode(data))
}

fn decode_b64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    BASE64
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)
}

/// Unique session id
pub type SessionId = Uuid;

/// The unit of work driven by the orchestrator loop
#[derive(Debug)]
pub struct CaptureSession {
    id: SessionId,
    config: SessionConfig,
    surface_id: String,
    status: SessionStatus,
    current_page: u32,
    frames: Vec<CapturedFrame>,
    accepted: usize,
}

impl CaptureSession {
    /// Create a session for an already validated config
    pub fn new(config: SessionConfig, surface_id: impl Into<String>) -> Self {
        let current_page = config.page_range.start;
        Self {
            id: Uuid::new_v4(),
            config,
            surface_id: surface_id.into(),
            status: SessionStatus::Idle,
            current_page,
            frames: Vec::new(),
            accepted: 0,
        }
    }

    /// Session id
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Session parameters
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Surface this session is bound to
    pub fn surface_id(&self) -> &str {
        &self.surface_id
    }

    /// Current state
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Last fully processed page (the start page before any work)
    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    /// Requested page count
    pub fn total_pages(&self) -> u32 {
        self.config.page_range.len()
    }

    /// Frames captured so far
    pub fn frames(&self) -> &[CapturedFrame] {
        &self.frames
    }

    /// Number of frames captured so far, including any already handed off
    pub fn captured(&self) -> usize {
        self.accepted
    }

    /// Index the next accepted frame will get
    pub fn next_index(&self) -> usize {
        self.accepted
    }

    pub(crate) fn transition(&mut self, status: SessionStatus) {
        self.status = status;
    }

    /// Mark `page` as fully processed
    pub(crate) fn complete_page(&mut self, page: u32) {
        debug_assert!(self.config.page_range.contains(page));
        self.current_page = page;
    }

    pub(crate) fn push_frame(&mut self, frame: CapturedFrame) {
        debug_assert_eq!(frame.index, self.accepted);
        self.frames.push(frame);
        self.accepted += 1;
    }

    /// Hand the frames over for assembly, leaving the session empty
    pub(crate) fn take_frames(&mut self) -> Vec<CapturedFrame> {
        std::mem::take(&mut self.frames)
    }

    /// Status view for `getStatus`
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            is_running: self.status.is_active(),
            current_page: self.current_page,
            start_page: self.config.page_range.start,
            total_pages: self.total_pages(),
            captured: self.accepted,
            status: self.status,
        }
    }
}

/// Result of `getStatus`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    /// Whether a session is active
    pub is_running: bool,
    /// Last fully processed page
    pub current_page: u32,
    /// First requested page
    pub start_page: u32,
    /// Requested page count
    pub total_pages: u32,
    /// Frames captured so far
    pub captured: usize,
    /// State machine state
    pub status: SessionStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(SessionConfig::for_range(1, 10).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_reversed_range() {
        let err = SessionConfig::for_range(5, 2).validate().unwrap_err();
        assert_eq!(err, SessionError::InvalidPageRange { start: 5, end: 2 });
    }

    #[test]
    fn test_validate_rejects_page_zero() {
        assert!(SessionConfig::for_range(0, 2).validate().is_err());
    }

    #[test]
    fn test_validate_delay_floor() {
        let mut config = SessionConfig::for_range(1, 2);
        config.inter_page_delay_ms = 499;
        assert!(matches!(
            config.validate(),
            Err(SessionError::DelayTooShort { actual: 499, .. })
        ));
        config.inter_page_delay_ms = 500;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zoom() {
        let mut config = SessionConfig::for_range(1, 2);
        config.zoom_factor = 0.5;
        assert!(config.validate().is_err());
        config.zoom_factor = f64::NAN;
        assert!(config.validate().is_err());
        config.zoom_factor = 2.0;
        assert!(config.validate().is_ok());
        assert!(config.zoom_enabled());
    }

    #[test]
    fn test_config_deserialize_camel_case() {
        let json = r#"{
            "pageRange": {"start": 3, "end": 7},
            "direction": "forward-is-left",
            "zoomFactor": 1.5,
            "interPageDelayMs": 800,
            "cropSpec": {"width": 1200, "height": 0},
            "resizeSpec": {"width": 0, "height": 0}
        }"#;
        let config: SessionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.page_range, PageRange::new(3, 7));
        assert_eq!(config.direction, Direction::ForwardIsLeft);
        assert!(config.crop_spec.is_set());
        assert!(!config.resize_spec.is_set());
    }

    #[test]
    fn test_config_deserialize_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"pageRange": {"start": 1, "end": 1}}"#).unwrap();
        assert_eq!(config.direction, Direction::ForwardIsRight);
        assert_eq!(config.zoom_factor, 1.0);
        assert_eq!(config.inter_page_delay_ms, 1000);
    }

    #[test]
    fn test_page_range_len() {
        assert_eq!(PageRange::new(1, 3).len(), 3);
        assert_eq!(PageRange::new(4, 4).len(), 1);
        assert!(PageRange::new(2, 5).contains(5));
        assert!(!PageRange::new(2, 5).contains(1));
    }

    #[test]
    fn test_session_snapshot() {
        let mut session = CaptureSession::new(SessionConfig::for_range(2, 6), "tab-1");
        assert_eq!(session.current_page(), 2);
        session.transition(SessionStatus::Capturing);
        session.push_frame(CapturedFrame::new(0, 2, vec![1, 2, 3]));
        session.complete_page(2);

        let snapshot = session.snapshot();
        assert!(snapshot.is_running);
        assert_eq!(snapshot.start_page, 2);
        assert_eq!(snapshot.total_pages, 5);
        assert_eq!(snapshot.captured, 1);
    }

    #[test]
    fn test_frame_serializes_as_base64() {
        let frame = CapturedFrame::new(0, 1, b"hello".to_vec());
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["data"], "aGVsbG8=");
        let back: CapturedFrame = serde_json::from_value(json).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn test_direction_reversed() {
        assert_eq!(
            Direction::ForwardIsLeft.reversed(),
            Direction::ForwardIsRight
        );
    }
}
