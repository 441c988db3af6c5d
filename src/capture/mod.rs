//! Capture orchestration
//!
//! Session model, retry policies, the target-surface seam, event fan-out and
//! the orchestrator loop that ties them together.

pub mod events;
pub mod heartbeat;
pub mod orchestrator;
pub mod policy;
pub mod session;
pub mod surface;

pub use events::{CaptureEvent, EventBus};
pub use heartbeat::Heartbeat;
pub use orchestrator::{
    CaptureOrchestrator, OrchestratorConfig, OrchestratorConfigBuilder, SessionEnd, SessionOutcome,
};
pub use policy::{BlankDetector, EncodedSizeHeuristic, RetryPolicy, DEFAULT_BLANK_THRESHOLD_BYTES};
pub use session::{
    CaptureSession, CapturedFrame, Dimensions, Direction, PageRange, SessionConfig, SessionId,
    SessionStatus, StatusSnapshot, MAX_ZOOM_FACTOR, MIN_INTER_PAGE_DELAY_MS,
};
pub use surface::{
    KeepAlive, NavigationMethod, NoopKeepAlive, PageInfo, SurfaceProvider, TargetSurface,
    TurnOutcome,
};
