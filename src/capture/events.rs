//! Progress and result notifications

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Notifications emitted by the orchestrator to any listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CaptureEvent {
    /// A page was captured
    Progress {
        /// Frames captured so far
        captured: usize,
        /// Pages requested
        total: u32,
    },
    /// The capture loop finished on its own
    CaptureComplete,
    /// The artifact was delivered
    DownloadReady {
        /// Pages in the artifact
        total: usize,
        /// Where the sink put it
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    /// The session failed or ended early
    CaptureError {
        /// Human-readable reason
        error: String,
    },
    /// The session was stopped on request
    ///
    /// Frames captured before the stop are still assembled; `path` points at
    /// the partial document when one was delivered.
    CaptureStopped {
        /// Pages in the partial document
        #[serde(default)]
        total: usize,
        /// Where the sink put it
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
}

impl CaptureEvent {
    /// Notification method name on the wire
    pub fn method(&self) -> &'static str {
        match self {
            CaptureEvent::Progress { .. } => "progress",
            CaptureEvent::CaptureComplete => "captureComplete",
            CaptureEvent::DownloadReady { .. } => "downloadReady",
            CaptureEvent::CaptureError { .. } => "captureError",
            CaptureEvent::CaptureStopped { .. } => "captureStopped",
        }
    }

    /// Whether this event ends a session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CaptureEvent::DownloadReady { .. }
                | CaptureEvent::CaptureError { .. }
                | CaptureEvent::CaptureStopped { .. }
        )
    }
}

/// Broadcast fan-out for [`CaptureEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CaptureEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per lagging receiver
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to future events
    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.sender.subscribe()
    }

    /// Send to all current listeners; having none is fine
    pub fn emit(&self, event: CaptureEvent) {
        debug!(method = event.method(), "Emitting event");
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Per-session emitter that lets exactly one terminal event through
#[derive(Debug)]
pub(crate) struct SessionEvents {
    bus: EventBus,
    completed: bool,
    terminated: bool,
}

impl SessionEvents {
    pub(crate) fn new(bus: EventBus) -> Self {
        Self {
            bus,
            completed: false,
            terminated: false,
        }
    }

    pub(crate) fn progress(&self, captured: usize, total: u32) {
        if !self.terminated {
            self.bus.emit(CaptureEvent::Progress { captured, total });
        }
    }

    pub(crate) fn complete(&mut self) {
        if !self.completed && !self.terminated {
            self.completed = true;
            self.bus.emit(CaptureEvent::CaptureComplete);
        }
    }

    /// Returns false when a terminal event was already sent
    pub(crate) fn terminate(&mut self, event: CaptureEvent) -> bool {
        debug_assert!(event.is_terminal());
        if self.terminated {
            return false;
        }
        self.terminated = true;
        self.bus.emit(event);
        true
    }
}
