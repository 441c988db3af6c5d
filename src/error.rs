//! Error types for pagecast
//!
//! One `thiserror` hierarchy covers the whole pipeline. Each sub-enum maps to
//! one class of failure: configuration and session lifecycle, the target
//! surface, individual captures, document assembly, the command protocol and
//! browser plumbing.

use thiserror::Error;

/// The main error type for pagecast operations
#[derive(Error, Debug)]
pub enum Error {
    /// Session lifecycle and configuration errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Target surface errors (wrong site, missing probe, closed tab)
    #[error("Surface error: {0}")]
    Surface(#[from] SurfaceError),

    /// Capture errors (screenshot, zoom)
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Frame processing and document assembly errors
    #[error("Assembly error: {0}")]
    Assembly(#[from] AssemblyError),

    /// Command protocol errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Browser lifecycle errors
    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// ChromiumOxide errors
    #[error("CDP error: {0}")]
    Cdp(String),
}

/// Session lifecycle and configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// A session is already active on the target surface
    #[error("A capture session is already running on surface {0}")]
    AlreadyRunning(String),

    /// Page range is empty, reversed, or not 1-indexed
    #[error("Invalid page range: start={start}, end={end}")]
    InvalidPageRange {
        /// First page requested
        start: u32,
        /// Last page requested
        end: u32,
    },

    /// Inter-page delay below the allowed floor
    #[error("Inter-page delay {actual}ms is below the minimum of {minimum}ms")]
    DelayTooShort {
        /// Requested delay
        actual: u64,
        /// Allowed floor
        minimum: u64,
    },

    /// Zoom factor outside the accepted range
    #[error("Zoom factor {0} is outside the accepted range")]
    InvalidZoom(f64),
}

/// Errors raised by the page surface being captured
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SurfaceError {
    /// No page is available to capture
    #[error("No active target surface")]
    NoActiveSurface,

    /// Surface URL does not belong to a supported site
    #[error("Unsupported surface: {0}")]
    UnsupportedSurface(String),

    /// Probe script could not be installed or never answered
    #[error("Page capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// The surface was closed mid-session
    #[error("Target surface closed")]
    Closed,

    /// A probe or navigator round-trip timed out
    #[error("Surface round-trip timed out after {0}ms")]
    Timeout(u64),
}

/// Capture errors (screenshot, zoom)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    /// Screenshot failed
    #[error("Screenshot capture failed: {0}")]
    ScreenshotFailed(String),

    /// Applying or restoring zoom failed
    #[error("Zoom change failed: {0}")]
    ZoomFailed(String),

    /// Capture timeout
    #[error("Capture timed out after {0}ms")]
    Timeout(u64),
}

/// Frame processing and PDF assembly errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssemblyError {
    /// Nothing to assemble
    #[error("No frames to assemble")]
    NoFrames,

    /// A frame could not be decoded
    #[error("Failed to decode frame {index}: {reason}")]
    Decode {
        /// Capture index of the offending frame
        index: usize,
        /// Decoder message
        reason: String,
    },

    /// A processed frame could not be re-encoded
    #[error("Failed to encode frame {index}: {reason}")]
    Encode {
        /// Capture index of the offending frame
        index: usize,
        /// Encoder message
        reason: String,
    },

    /// PDF serialization failed
    #[error("PDF generation failed: {0}")]
    Pdf(String),

    /// A batch arrived before the transfer was started
    #[error("Batch received without a preceding batch init")]
    BatchNotStarted,

    /// The frame processor task is gone
    #[error("Frame processor unavailable")]
    ProcessorUnavailable,

    /// The processor did not reply in time
    #[error("Assembly timed out after {0}ms")]
    Timeout(u64),

    /// Artifact reference unknown or already collected
    #[error("Unknown artifact reference: {0}")]
    UnknownArtifact(String),
}

/// Command protocol errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Invalid JSON-RPC request
    #[error("Invalid JSON-RPC request: {0}")]
    InvalidRequest(String),

    /// Unknown method
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// Invalid parameters
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Parse error
    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Browser lifecycle and control errors
#[derive(Error, Debug)]
pub enum BrowserError {
    /// Failed to launch browser
    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    /// Failed to attach to a running browser
    #[error("Failed to connect to browser at {url}: {reason}")]
    ConnectFailed {
        /// DevTools websocket URL
        url: String,
        /// Underlying error
        reason: String,
    },

    /// Browser configuration error
    #[error("Invalid browser configuration: {0}")]
    ConfigError(String),

    /// Failed to create new page/tab
    #[error("Failed to create page: {0}")]
    PageCreationFailed(String),
}

/// Result type alias for pagecast operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a CDP error from a string
    pub fn cdp<S: Into<String>>(msg: S) -> Self {
        Error::Cdp(msg.into())
    }

    /// True when the error means the surface is gone for good
    pub fn is_surface_lost(&self) -> bool {
        matches!(self, Error::Surface(SurfaceError::Closed))
    }
}

/// Convert chromiumoxide errors
impl From<chromiumoxide::error::CdpError> for Error {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        Error::Cdp(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Browser(BrowserError::LaunchFailed("no chrome".to_string()));
        assert!(err.to_string().contains("Failed to launch browser"));
        assert!(err.to_string().contains("no chrome"));
    }

    #[test]
    fn test_session_error() {
        let err = SessionError::InvalidPageRange { start: 5, end: 2 };
        assert_eq!(err.to_string(), "Invalid page range: start=5, end=2");

        let err = SessionError::DelayTooShort {
            actual: 100,
            minimum: 500,
        };
        assert!(err.to_string().contains("100ms"));
        assert!(err.to_string().contains("500ms"));
    }

    #[test]
    fn test_surface_error() {
        let err: Error = SurfaceError::UnsupportedSurface("https://example.com".into()).into();
        assert!(err.to_string().contains("Unsupported surface"));
        assert!(!err.is_surface_lost());
        assert!(Error::from(SurfaceError::Closed).is_surface_lost());
    }

    #[test]
    fn test_assembly_error() {
        let err = AssemblyError::Decode {
            index: 3,
            reason: "bad header".to_string(),
        };
        assert!(err.to_string().contains("frame 3"));
        assert!(err.to_string().contains("bad header"));
    }

    #[test]
    fn test_protocol_error() {
        let err = ProtocolError::UnknownMethod("tools/list".into());
        assert_eq!(err.to_string(), "Unknown method: tools/list");
    }
}
