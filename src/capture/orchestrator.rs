//! Capture orchestrator
//!
//! Drives one session per target surface through
//! navigate → await-ready → capture → verify → advance, then hands the frames
//! to the frame processor and the result to the delivery sink.
//!
//! Every step is an awaited round-trip with its own timeout; a peer that does
//! not answer degrades to a fallback instead of stalling the loop. A stop
//! request is observed only between pages, so the page in flight always
//! finishes.

use super::events::{CaptureEvent, EventBus, SessionEvents};
use super::heartbeat::{Heartbeat, MIN_HEARTBEAT_INTERVAL};
use super::policy::{BlankDetector, EncodedSizeHeuristic, RetryPolicy};
use super::session::{
    CaptureSession, CapturedFrame, Direction, SessionConfig, SessionId, SessionStatus,
    StatusSnapshot,
};
use super::surface::{KeepAlive, SurfaceProvider, TargetSurface};
use crate::delivery::DeliverySink;
use crate::error::{CaptureError, Result, SessionError, SurfaceError};
use crate::metrics::global_metrics;
use crate::processor::{ArtifactStore, FrameProcessor, ProcessingOptions, DEFAULT_BATCH_SIZE};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Tunables for the orchestrator
#[derive(Clone)]
pub struct OrchestratorConfig {
    /// Readiness polling (default: 10 × 300ms)
    pub ready_poll: RetryPolicy,
    /// Transport-level capture retries (default: 3 × 300ms)
    pub capture_retry: RetryPolicy,
    /// Blank-suspect retries (default: 3, 500ms + 500ms per attempt)
    pub blank_retry: RetryPolicy,
    /// Timeout for one probe or navigator round-trip (default: 5000ms)
    pub message_timeout: Duration,
    /// Pause after injecting the probe (default: 1000ms)
    pub inject_settle: Duration,
    /// Budget handed to the page for one page turn (default: 3000ms)
    pub turn_timeout: Duration,
    /// Timeout for document assembly (default: 120s)
    pub assembly_timeout: Duration,
    /// Keep-alive period (default: 20s)
    pub heartbeat_interval: Duration,
    /// Frames per processor message (default: 10)
    pub batch_size: usize,
    /// Hosts a session may run on; empty accepts any http(s) page
    pub supported_hosts: Vec<String>,
    /// Blank-suspect classifier
    pub blank_detector: Arc<dyn BlankDetector>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            ready_poll: RetryPolicy::fixed(10, Duration::from_millis(300)),
            capture_retry: RetryPolicy::fixed(3, Duration::from_millis(300)),
            blank_retry: RetryPolicy::escalating(
                3,
                Duration::from_millis(500),
                Duration::from_millis(500),
            ),
            message_timeout: Duration::from_millis(5000),
            inject_settle: Duration::from_millis(1000),
            turn_timeout: Duration::from_millis(3000),
            assembly_timeout: Duration::from_secs(120),
            heartbeat_interval: Duration::from_secs(20),
            batch_size: DEFAULT_BATCH_SIZE,
            supported_hosts: Vec::new(),
            blank_detector: Arc::new(EncodedSizeHeuristic::default()),
        }
    }
}

impl std::fmt::Debug for OrchestratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorConfig")
            .field("ready_poll", &self.ready_poll)
            .field("capture_retry", &self.capture_retry)
            .field("blank_retry", &self.blank_retry)
            .field("message_timeout", &self.message_timeout)
            .field("inject_settle", &self.inject_settle)
            .field("turn_timeout", &self.turn_timeout)
            .field("assembly_timeout", &self.assembly_timeout)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("batch_size", &self.batch_size)
            .field("supported_hosts", &self.supported_hosts)
            .finish_non_exhaustive()
    }
}

impl OrchestratorConfig {
    /// Create a new config builder
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::default()
    }

    /// Whether `url` belongs to a supported site
    ///
    /// A host matches an entry when it equals it or is a subdomain of it.
    pub fn is_supported_url(&self, url: &str) -> bool {
        let Ok(parsed) = url::Url::parse(url) else {
            return false;
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return false;
        }
        let Some(host) = parsed.host_str() else {
            return false;
        };
        if self.supported_hosts.is_empty() {
            return true;
        }
        let host = host.to_ascii_lowercase();
        self.supported_hosts.iter().any(|site| {
            let site = site.trim().trim_start_matches('.').to_ascii_lowercase();
            host == site || host.ends_with(&format!(".{}", site))
        })
    }
}

/// Builder for OrchestratorConfig
#[derive(Default)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    /// Set the readiness polling policy
    pub fn ready_poll(mut self, policy: RetryPolicy) -> Self {
        self.config.ready_poll = policy;
        self
    }

    /// Set the capture retry policy
    pub fn capture_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.capture_retry = policy;
        self
    }

    /// Set the blank-suspect retry policy
    pub fn blank_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.blank_retry = policy;
        self
    }

    /// Set the per-round-trip timeout
    pub fn message_timeout(mut self, timeout: Duration) -> Self {
        self.config.message_timeout = timeout;
        self
    }

    /// Set the post-injection settle wait
    pub fn inject_settle(mut self, wait: Duration) -> Self {
        self.config.inject_settle = wait;
        self
    }

    /// Set the page-turn budget
    pub fn turn_timeout(mut self, timeout: Duration) -> Self {
        self.config.turn_timeout = timeout;
        self
    }

    /// Set the assembly timeout
    pub fn assembly_timeout(mut self, timeout: Duration) -> Self {
        self.config.assembly_timeout = timeout;
        self
    }

    /// Set the keep-alive period
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval.max(MIN_HEARTBEAT_INTERVAL);
        self
    }

    /// Set the processor batch size
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size.max(1);
        self
    }

    /// Add a supported host
    pub fn site<S: Into<String>>(mut self, host: S) -> Self {
        self.config.supported_hosts.push(host.into());
        self
    }

    /// Replace the blank-suspect classifier
    pub fn blank_detector(mut self, detector: Arc<dyn BlankDetector>) -> Self {
        self.config.blank_detector = detector;
        self
    }

    /// Build the config
    pub fn build(self) -> OrchestratorConfig {
        self.config
    }
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Every requested page was processed
    Completed,
    /// A stop request was observed
    Stopped,
    /// The session failed; partial output may still have been delivered
    Failed(String),
}

impl SessionEnd {
    /// Short name used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            SessionEnd::Completed => "completed",
            SessionEnd::Stopped => "stopped",
            SessionEnd::Failed(_) => "failed",
        }
    }
}

/// Summary returned by a session's task
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    /// Session id
    pub session_id: SessionId,
    /// How the session ended
    pub end: SessionEnd,
    /// Frames in the delivered document
    pub captured: usize,
    /// Pages processed without producing a frame
    pub missing_pages: Vec<u32>,
    /// Last fully processed page
    pub current_page: u32,
    /// Where the document went, if one was delivered
    pub location: Option<String>,
    /// The single terminal event sent for this session
    pub terminal: Option<CaptureEvent>,
}

/// Why the page loop stopped
#[derive(Debug)]
enum LoopExit {
    Natural,
    Stopped,
    SurfaceLost,
}

struct ActiveSession {
    id: SessionId,
    token: CancellationToken,
    status: Arc<Mutex<StatusSnapshot>>,
}

type Registry = Arc<Mutex<HashMap<String, ActiveSession>>>;

/// The control plane: owns session lifecycle on top of a surface provider,
/// a delivery sink and a keep-alive target
pub struct CaptureOrchestrator {
    provider: Arc<dyn SurfaceProvider>,
    sink: Arc<dyn DeliverySink>,
    keep_alive: Arc<dyn KeepAlive>,
    config: Arc<OrchestratorConfig>,
    events: EventBus,
    store: ArtifactStore,
    sessions: Registry,
    last_status: Arc<Mutex<StatusSnapshot>>,
}

impl CaptureOrchestrator {
    /// Create an orchestrator
    pub fn new(
        provider: Arc<dyn SurfaceProvider>,
        sink: Arc<dyn DeliverySink>,
        keep_alive: Arc<dyn KeepAlive>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            provider,
            sink,
            keep_alive,
            config: Arc::new(config),
            events: EventBus::default(),
            store: ArtifactStore::new(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            last_status: Arc::new(Mutex::new(StatusSnapshot::default())),
        }
    }

    /// Event bus carrying progress and terminal notifications
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Orchestrator settings
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Artifacts assembled but not yet handed to the sink
    pub fn artifacts(&self) -> &ArtifactStore {
        &self.store
    }

    /// Validate, bind to the active surface and spawn the capture loop
    ///
    /// Returns once the session is running. Every failure here leaves no
    /// session state behind.
    #[instrument(skip(self, config), fields(start = config.page_range.start, end = config.page_range.end))]
    pub async fn start(&self, config: SessionConfig) -> Result<JoinHandle<SessionOutcome>> {
        config.validate()?;

        let surface = self.provider.active_surface().await?;
        let surface_id = surface.id();

        let url = surface.url().await?;
        if !self.config.is_supported_url(&url) {
            return Err(SurfaceError::UnsupportedSurface(url).into());
        }

        let session = CaptureSession::new(config, surface_id.clone());
        let token = CancellationToken::new();
        let status = Arc::new(Mutex::new(session.snapshot()));
        {
            let mut sessions = self.sessions.lock();
            if sessions.contains_key(&surface_id) {
                return Err(SessionError::AlreadyRunning(surface_id).into());
            }
            sessions.insert(
                surface_id.clone(),
                ActiveSession {
                    id: session.id(),
                    token: token.clone(),
                    status: status.clone(),
                },
            );
        }

        let mut runner = SessionRunner {
            session,
            surface,
            config: self.config.clone(),
            events: SessionEvents::new(self.events.clone()),
            token,
            status,
            store: self.store.clone(),
            sink: self.sink.clone(),
            missing: Vec::new(),
        };

        runner.transition(SessionStatus::Initializing);
        if let Err(e) = runner.ensure_probe().await {
            self.sessions.lock().remove(&surface_id);
            return Err(e);
        }

        global_metrics().record_session_started();
        info!(
            session = %runner.session.id(),
            surface = %surface_id,
            url = %url,
            "Capture session started"
        );

        let keep_alive = self.keep_alive.clone();
        let sessions = self.sessions.clone();
        let last_status = self.last_status.clone();
        Ok(tokio::spawn(async move {
            let heartbeat = Heartbeat::start(keep_alive, runner.config.heartbeat_interval);
            let outcome = runner.run().await;
            heartbeat.stop().await;

            let final_status = runner.finalize_status(&outcome.end);
            *last_status.lock() = final_status;
            {
                let mut sessions = sessions.lock();
                if sessions
                    .get(&surface_id)
                    .is_some_and(|active| active.id == outcome.session_id)
                {
                    sessions.remove(&surface_id);
                }
            }
            global_metrics().record_session_finished(outcome.end.label());
            outcome
        }))
    }

    /// Request every active session to stop after its current page
    ///
    /// Returns whether any session was running.
    pub fn stop(&self) -> bool {
        let sessions = self.sessions.lock();
        for (surface, active) in sessions.iter() {
            info!(session = %active.id, surface = %surface, "Stop requested");
            active.token.cancel();
        }
        !sessions.is_empty()
    }

    /// Snapshot of the running session, or of the last one
    pub fn status(&self) -> StatusSnapshot {
        let sessions = self.sessions.lock();
        match sessions.values().next() {
            Some(active) => *active.status.lock(),
            None => *self.last_status.lock(),
        }
    }

    /// Whether a session is active on any surface
    pub fn is_running(&self) -> bool {
        !self.sessions.lock().is_empty()
    }
}

/// State owned by one session's loop task
struct SessionRunner {
    session: CaptureSession,
    surface: Arc<dyn TargetSurface>,
    config: Arc<OrchestratorConfig>,
    events: SessionEvents,
    token: CancellationToken,
    status: Arc<Mutex<StatusSnapshot>>,
    store: ArtifactStore,
    sink: Arc<dyn DeliverySink>,
    missing: Vec<u32>,
}

impl SessionRunner {
    fn transition(&mut self, status: SessionStatus) {
        debug!(from = ?self.session.status(), to = ?status, "Session transition");
        self.session.transition(status);
        self.publish();
    }

    fn publish(&self) {
        *self.status.lock() = self.session.snapshot();
    }

    fn finalize_status(&mut self, end: &SessionEnd) -> StatusSnapshot {
        let status = match end {
            SessionEnd::Failed(_) => SessionStatus::Failed,
            _ => SessionStatus::Idle,
        };
        self.session.transition(status);
        self.session.snapshot()
    }

    /// Round-trip with the configured timeout; `None` when the peer did not answer
    async fn round_trip<T, F>(&self, what: &str, fut: F) -> Option<Result<T>>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.config.message_timeout, fut).await {
            Ok(result) => Some(result),
            Err(_) => {
                debug!(
                    call = what,
                    timeout_ms = self.config.message_timeout.as_millis() as u64,
                    "Surface round-trip timed out"
                );
                None
            }
        }
    }

    /// A surface that does not answer `is_open` in time counts as closed
    async fn surface_open(&self) -> bool {
        tokio::time::timeout(self.config.message_timeout, self.surface.is_open())
            .await
            .unwrap_or(false)
    }

    /// Ping the probe and install it if it does not answer
    async fn ensure_probe(&self) -> Result<()> {
        if let Some(Ok(true)) = self.round_trip("ping", self.surface.ping()).await {
            return Ok(());
        }

        info!("Probe not present, injecting");
        match self.round_trip("inject", self.surface.inject_probe()).await {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                return Err(SurfaceError::CapabilityUnavailable(e.to_string()).into())
            }
            None => {
                return Err(SurfaceError::CapabilityUnavailable(
                    "probe injection timed out".to_string(),
                )
                .into())
            }
        }
        tokio::time::sleep(self.config.inject_settle).await;

        match self.round_trip("ping", self.surface.ping()).await {
            Some(Ok(true)) => Ok(()),
            _ => Err(SurfaceError::CapabilityUnavailable(
                "probe did not answer after injection".to_string(),
            )
            .into()),
        }
    }

    async fn run(&mut self) -> SessionOutcome {
        let exit = self.capture_pages().await;
        if matches!(exit, LoopExit::Stopped) {
            self.transition(SessionStatus::Stopping);
        }
        self.finish(exit).await
    }

    async fn capture_pages(&mut self) -> LoopExit {
        let range = self.session.config().page_range;
        let total = self.session.total_pages();

        self.transition(SessionStatus::NavigatingToStart);
        if let Err(e) = self.navigate_to_start().await {
            if e.is_surface_lost() {
                return LoopExit::SurfaceLost;
            }
            warn!("Could not confirm start page: {}", e);
        }

        for page in range.start..=range.end {
            if self.token.is_cancelled() {
                info!(page, "Stop observed before page");
                return LoopExit::Stopped;
            }
            let cycle = Instant::now();

            if page != range.start {
                self.transition(SessionStatus::Advancing);
                if let Err(e) = self.advance(self.session.config().direction).await {
                    error!(page, "Page turn failed: {}", e);
                    return LoopExit::SurfaceLost;
                }
                tokio::time::sleep(Duration::from_millis(
                    self.session.config().inter_page_delay_ms,
                ))
                .await;
            }

            self.transition(SessionStatus::AwaitingReady);
            self.await_ready().await;

            self.transition(SessionStatus::Capturing);
            match self.capture_with_retry().await {
                Ok(Some(data)) => {
                    self.transition(SessionStatus::Verifying);
                    let data = self.verify(data).await;
                    let index = self.session.next_index();
                    self.session
                        .push_frame(CapturedFrame::new(index, page, data));
                    global_metrics().record_page_captured(cycle.elapsed());
                }
                Ok(None) => {
                    warn!(page, "No frame captured, page will be missing");
                    self.missing.push(page);
                    global_metrics().record_page_missing();
                }
                Err(e) => {
                    error!(page, "Surface lost during capture: {}", e);
                    global_metrics().record_error("surface_closed");
                    return LoopExit::SurfaceLost;
                }
            }

            self.session.complete_page(page);
            self.publish();
            self.events.progress(self.session.captured(), total);
            debug!(
                page,
                captured = self.session.captured(),
                total,
                elapsed_ms = cycle.elapsed().as_millis() as u64,
                "Page processed"
            );
        }

        LoopExit::Natural
    }

    /// Bring the viewer to the first requested page when the probe reports
    /// its position; otherwise assume it is already there
    async fn navigate_to_start(&self) -> Result<()> {
        let start = self.session.config().page_range.start;
        let direction = self.session.config().direction;
        let delay = Duration::from_millis(self.session.config().inter_page_delay_ms);

        let current = match self.round_trip("pageInfo", self.surface.page_info()).await {
            Some(Ok(info)) => info.current,
            Some(Err(e)) if e.is_surface_lost() => return Err(e),
            _ => None,
        };
        let Some(current) = current else {
            debug!(start, "Viewer position unknown, assuming start page");
            return Ok(());
        };
        if current == start {
            return Ok(());
        }

        let (turn, steps) = if current < start {
            (direction, start - current)
        } else {
            (direction.reversed(), current - start)
        };
        info!(current, start, steps, "Navigating to start page");
        for _ in 0..steps {
            self.advance(turn).await?;
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    /// Turn one page: key press first, click fallback second
    ///
    /// Only a closed surface is an error; a turn nobody handled is logged and
    /// the loop goes on.
    async fn advance(&self, direction: Direction) -> Result<()> {
        let turn_timeout = self.config.turn_timeout;

        match self
            .round_trip("turnPage", self.surface.turn_page(direction, turn_timeout))
            .await
        {
            Some(Ok(outcome)) if outcome.success => {
                debug!(method = ?outcome.method, "Page turned");
                return Ok(());
            }
            Some(Ok(_)) => debug!("Key press not handled, falling back to click"),
            Some(Err(e)) if e.is_surface_lost() => return Err(e),
            Some(Err(e)) => warn!("Key navigation failed: {}", e),
            None => warn!("Key navigation timed out"),
        }

        global_metrics().record_fallback_click();
        match self
            .round_trip(
                "turnPageClick",
                self.surface.turn_page_click(direction, turn_timeout),
            )
            .await
        {
            Some(Ok(outcome)) if outcome.success => {
                debug!(method = ?outcome.method, "Page turned by click");
                Ok(())
            }
            Some(Err(e)) if e.is_surface_lost() => Err(e),
            _ => {
                if !self.surface_open().await {
                    return Err(SurfaceError::Closed.into());
                }
                warn!("Page turn not confirmed, continuing");
                Ok(())
            }
        }
    }

    /// Poll readiness; proceeds regardless once attempts run out
    async fn await_ready(&self) {
        let policy = self.config.ready_poll;
        let mut attempt = 0;
        loop {
            let ready = match self
                .round_trip("isContentReady", self.surface.is_content_ready())
                .await
            {
                Some(Ok(ready)) => ready,
                Some(Err(e)) => {
                    debug!("Readiness probe failed, treating as ready: {}", e);
                    true
                }
                None => true,
            };

            if ready {
                return;
            }
            if policy.is_last(attempt) {
                warn!(attempts = attempt + 1, "Content not ready, capturing anyway");
                global_metrics().record_readiness_timeout();
                return;
            }
            tokio::time::sleep(policy.delay_for(attempt)).await;
            attempt += 1;
        }
    }

    /// One capture with the given zoom, restoring zoom on every path
    async fn capture_once(&self, zoom: f64) -> Result<Vec<u8>> {
        let zoomed = zoom > 1.0;

        let result: Result<Vec<u8>> = async {
            if zoomed {
                match self.round_trip("setZoom", self.surface.set_zoom(zoom)).await {
                    Some(Ok(())) => {}
                    Some(Err(e)) => return Err(CaptureError::ZoomFailed(e.to_string()).into()),
                    None => {
                        return Err(CaptureError::ZoomFailed("zoom change timed out".into()).into())
                    }
                }
            }
            match self
                .round_trip("capture", self.surface.capture_visible())
                .await
            {
                Some(result) => result,
                None => Err(
                    CaptureError::Timeout(self.config.message_timeout.as_millis() as u64).into(),
                ),
            }
        }
        .await;

        if zoomed {
            global_metrics().record_zoom_restore();
            match self.round_trip("setZoom", self.surface.set_zoom(1.0)).await {
                Some(Ok(())) => {}
                Some(Err(e)) => warn!("Zoom restore failed: {}", e),
                None => warn!("Zoom restore timed out"),
            }
        }

        result
    }

    /// Capture with bounded retries, then one un-zoomed attempt
    ///
    /// `Ok(None)` means the page produced no frame; `Err` only when the
    /// surface is gone.
    async fn capture_with_retry(&self) -> Result<Option<Vec<u8>>> {
        let policy = self.config.capture_retry;
        let zoom = self.session.config().zoom_factor;

        let mut attempt = 0;
        loop {
            match self.capture_once(zoom).await {
                Ok(data) => return Ok(Some(data)),
                Err(e) if e.is_surface_lost() => return Err(e),
                Err(e) => {
                    warn!(attempt, "Capture failed: {}", e);
                    if policy.is_last(attempt) {
                        break;
                    }
                    global_metrics().record_capture_retry();
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                    attempt += 1;
                }
            }
        }

        if zoom > 1.0 {
            info!("Retrying capture without zoom");
            match self.capture_once(1.0).await {
                Ok(data) => return Ok(Some(data)),
                Err(e) => warn!("Un-zoomed capture failed: {}", e),
            }
        }

        if !self.surface_open().await {
            return Err(SurfaceError::Closed.into());
        }
        Ok(None)
    }

    /// Re-capture blank-suspect frames; the last frame is accepted regardless
    async fn verify(&self, mut data: Vec<u8>) -> Vec<u8> {
        let policy = self.config.blank_retry;
        let zoom = self.session.config().zoom_factor;

        let mut attempt = 0;
        while policy.should_retry(attempt, self.config.blank_detector.is_blank_suspect(&data)) {
            global_metrics().record_blank_retry();
            debug!(attempt, bytes = data.len(), "Blank-suspect frame, retrying");
            tokio::time::sleep(policy.delay_for(attempt)).await;
            self.await_ready().await;
            match self.capture_once(zoom).await {
                Ok(fresh) => data = fresh,
                Err(e) => warn!("Re-capture failed, keeping previous frame: {}", e),
            }
            attempt += 1;
        }
        if self.config.blank_detector.is_blank_suspect(&data) {
            warn!(bytes = data.len(), "Accepting blank-suspect frame");
        }
        data
    }

    async fn assemble_and_deliver(&self, frames: Vec<CapturedFrame>) -> Result<Option<String>> {
        let count = frames.len();
        let options = ProcessingOptions::new(
            self.session.config().crop_spec,
            self.session.config().resize_spec,
        );
        let mut processor = FrameProcessor::spawn(self.store.clone());
        let artifact_ref = processor
            .submit(
                frames,
                options,
                self.config.batch_size,
                self.config.assembly_timeout,
            )
            .await?;
        let artifact = self.store.take(&artifact_ref)?;
        info!(pages = count, file = %artifact.filename, "Delivering document");
        self.sink.deliver(artifact).await
    }

    async fn finish(&mut self, exit: LoopExit) -> SessionOutcome {
        self.transition(SessionStatus::Completing);
        if matches!(exit, LoopExit::Natural) {
            self.events.complete();
        }

        let frames = self.session.take_frames();
        let captured = frames.len();
        let delivered = if frames.is_empty() {
            None
        } else {
            Some(self.assemble_and_deliver(frames).await)
        };

        let (end, location, event) = match (exit, delivered) {
            (LoopExit::Natural, Some(Ok(path))) => (
                SessionEnd::Completed,
                path.clone(),
                CaptureEvent::DownloadReady {
                    total: captured,
                    path,
                },
            ),
            (LoopExit::Natural, None) => {
                let error = "No pages were captured".to_string();
                (
                    SessionEnd::Failed(error.clone()),
                    None,
                    CaptureEvent::CaptureError { error },
                )
            }
            (LoopExit::Stopped, Some(Ok(path))) => (
                SessionEnd::Stopped,
                path.clone(),
                CaptureEvent::CaptureStopped {
                    total: captured,
                    path,
                },
            ),
            (LoopExit::Stopped, None) => (
                SessionEnd::Stopped,
                None,
                CaptureEvent::CaptureStopped {
                    total: 0,
                    path: None,
                },
            ),
            (LoopExit::SurfaceLost, Some(Ok(path))) => {
                let error = match &path {
                    Some(p) => format!(
                        "Capture ended early: the page was closed after {} pages; partial document saved to {}",
                        captured, p
                    ),
                    None => format!(
                        "Capture ended early: the page was closed after {} pages; partial document delivered",
                        captured
                    ),
                };
                (
                    SessionEnd::Failed(error.clone()),
                    path,
                    CaptureEvent::CaptureError { error },
                )
            }
            (LoopExit::SurfaceLost, None) => {
                let error = "Capture ended early: the page was closed before any page was captured"
                    .to_string();
                (
                    SessionEnd::Failed(error.clone()),
                    None,
                    CaptureEvent::CaptureError { error },
                )
            }
            (_, Some(Err(e))) => {
                error!("Document assembly failed: {}", e);
                global_metrics().record_error("assembly");
                let error = format!("Failed to build document: {}", e);
                (
                    SessionEnd::Failed(error.clone()),
                    None,
                    CaptureEvent::CaptureError { error },
                )
            }
        };

        let terminal = if self.events.terminate(event.clone()) {
            Some(event)
        } else {
            None
        };

        info!(
            session = %self.session.id(),
            outcome = end.label(),
            captured,
            missing = self.missing.len(),
            "Capture session finished"
        );

        SessionOutcome {
            session_id: self.session.id(),
            end,
            captured,
            missing_pages: std::mem::take(&mut self.missing),
            current_page: self.session.current_page(),
            location,
            terminal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policies() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.ready_poll.max_attempts, 10);
        assert_eq!(config.blank_retry.delay_for(0), Duration::from_millis(500));
        assert_eq!(config.blank_retry.delay_for(2), Duration::from_millis(1500));
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_supported_url_any_host_when_unrestricted() {
        let config = OrchestratorConfig::default();
        assert!(config.is_supported_url("https://reader.example.com/book/1"));
        assert!(!config.is_supported_url("chrome://newtab"));
        assert!(!config.is_supported_url("not a url"));
    }

    #[test]
    fn test_supported_url_matches_subdomains() {
        let config = OrchestratorConfig::builder().site("example.com").build();
        assert!(config.is_supported_url("https://example.com/viewer"));
        assert!(config.is_supported_url("https://READ.example.com/viewer"));
        assert!(!config.is_supported_url("https://notexample.com/viewer"));
        assert!(!config.is_supported_url("https://example.org/"));
    }

    #[test]
    fn test_builder_batch_size_floor() {
        let config = OrchestratorConfig::builder().batch_size(0).build();
        assert_eq!(config.batch_size, 1);
    }

    #[test]
    fn test_builder_heartbeat_floor() {
        let config = OrchestratorConfig::builder()
            .heartbeat_interval(Duration::ZERO)
            .build();
        assert_eq!(config.heartbeat_interval, MIN_HEARTBEAT_INTERVAL);
    }

    #[test]
    fn test_session_end_labels() {
        assert_eq!(SessionEnd::Completed.label(), "completed");
        assert_eq!(SessionEnd::Failed("x".into()).label(), "failed");
    }
}
