//! Scripted viewer shared by the integration tests
//!
//! `FakeViewer` behaves like a paginated viewer tab: turns move a page
//! counter, captures return a PNG whose width encodes the page number
//! (`100 + page`), and individual pages can be scripted to fail, come back
//! blank, pause or close the tab.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use pagecast::capture::{
    BlankDetector, CaptureOrchestrator, Direction, NavigationMethod, NoopKeepAlive,
    OrchestratorConfig, PageInfo, RetryPolicy, SurfaceProvider, TargetSurface, TurnOutcome,
};
use pagecast::delivery::MemorySink;
use pagecast::error::{CaptureError, Result, SurfaceError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub const VIEWER_URL: &str = "https://reader.example.com/book/42";

/// Width of the frame captured on `page`
pub fn frame_width(page: u32) -> u32 {
    100 + page
}

/// Solid-color PNG
pub fn png_frame(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([40, 40, 40]));
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut buffer, ImageFormat::Png)
        .expect("encode png");
    buffer.into_inner()
}

/// Flags frames narrower than 50px, i.e. the scripted blank page
pub struct NarrowFrameDetector;

impl BlankDetector for NarrowFrameDetector {
    fn is_blank_suspect(&self, encoded: &[u8]) -> bool {
        image::load_from_memory(encoded)
            .map(|img| img.width() < 50)
            .unwrap_or(true)
    }
}

/// Behavior knobs
#[derive(Debug, Clone)]
pub struct Script {
    pub url: String,
    pub forward: Direction,
    pub start_page: u32,
    pub report_position: bool,
    pub key_works: bool,
    pub probe_installed: bool,
    pub inject_fails: bool,
    pub failing_page: Option<u32>,
    pub zoom_sensitive_page: Option<u32>,
    pub blank_page: Option<u32>,
    pub close_after: Option<u32>,
    pub pause_on: Option<u32>,
    /// Readiness never reports ready
    pub never_ready: bool,
    /// Readiness check itself errors
    pub ready_errors: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            url: VIEWER_URL.to_string(),
            forward: Direction::ForwardIsRight,
            start_page: 1,
            report_position: false,
            key_works: true,
            probe_installed: true,
            inject_fails: false,
            failing_page: None,
            zoom_sensitive_page: None,
            blank_page: None,
            close_after: None,
            pause_on: None,
            never_ready: false,
            ready_errors: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct ViewerState {
    pub page: u32,
    pub open: bool,
    pub probe: bool,
    pub zoom: f64,
    pub zooms_seen: Vec<f64>,
    pub captures: HashMap<u32, usize>,
    pub key_turns: usize,
    pub click_turns: usize,
    pub injections: usize,
    pub ready_polls: usize,
}

pub struct FakeViewer {
    script: Script,
    pub state: Mutex<ViewerState>,
    /// Signalled when the `pause_on` page is being captured
    pub capture_reached: Notify,
}

impl FakeViewer {
    pub fn new(script: Script) -> Arc<Self> {
        let state = ViewerState {
            page: script.start_page,
            open: true,
            probe: script.probe_installed,
            zoom: 1.0,
            ..Default::default()
        };
        Arc::new(Self {
            script,
            state: Mutex::new(state),
            capture_reached: Notify::new(),
        })
    }

    pub fn captures_of(&self, page: u32) -> usize {
        self.state.lock().captures.get(&page).copied().unwrap_or(0)
    }

    fn step(&self, state: &mut ViewerState, direction: Direction) {
        if direction == self.script.forward {
            state.page += 1;
        } else {
            state.page = state.page.saturating_sub(1).max(1);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.lock().open {
            Ok(())
        } else {
            Err(SurfaceError::Closed.into())
        }
    }
}

#[async_trait]
impl TargetSurface for FakeViewer {
    fn id(&self) -> String {
        "tab-1".to_string()
    }

    async fn url(&self) -> Result<String> {
        self.ensure_open()?;
        Ok(self.script.url.clone())
    }

    async fn is_open(&self) -> bool {
        self.state.lock().open
    }

    async fn ping(&self) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.state.lock().probe)
    }

    async fn inject_probe(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.injections += 1;
        if self.script.inject_fails {
            return Err(SurfaceError::CapabilityUnavailable("script blocked".into()).into());
        }
        state.probe = true;
        Ok(())
    }

    async fn turn_page(&self, direction: Direction, _timeout: Duration) -> Result<TurnOutcome> {
        self.ensure_open()?;
        if !self.script.key_works {
            return Ok(TurnOutcome::not_handled());
        }
        let mut state = self.state.lock();
        self.step(&mut state, direction);
        state.key_turns += 1;
        Ok(TurnOutcome::dispatched(
            NavigationMethod::Key,
            Some(PageInfo {
                current: Some(state.page),
                ..Default::default()
            }),
        ))
    }

    async fn turn_page_click(
        &self,
        direction: Direction,
        _timeout: Duration,
    ) -> Result<TurnOutcome> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        self.step(&mut state, direction);
        state.click_turns += 1;
        Ok(TurnOutcome::dispatched(NavigationMethod::EdgeClick, None))
    }

    async fn page_info(&self) -> Result<PageInfo> {
        self.ensure_open()?;
        if !self.script.report_position {
            return Ok(PageInfo::default());
        }
        Ok(PageInfo {
            current: Some(self.state.lock().page),
            ..Default::default()
        })
    }

    async fn is_content_ready(&self) -> Result<bool> {
        self.ensure_open()?;
        self.state.lock().ready_polls += 1;
        if self.script.ready_errors {
            return Err(SurfaceError::Timeout(5000).into());
        }
        Ok(!self.script.never_ready)
    }

    async fn set_zoom(&self, factor: f64) -> Result<()> {
        self.ensure_open()?;
        self.state.lock().zoom = factor;
        Ok(())
    }

    async fn capture_visible(&self) -> Result<Vec<u8>> {
        let (page, zoom) = {
            let mut state = self.state.lock();
            if !state.open {
                return Err(SurfaceError::Closed.into());
            }
            let page = state.page;
            *state.captures.entry(page).or_default() += 1;
            (page, state.zoom)
        };

        if self.script.pause_on == Some(page) {
            self.capture_reached.notify_one();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if self.script.failing_page == Some(page) {
            return Err(CaptureError::ScreenshotFailed("renderer busy".into()).into());
        }
        if self.script.zoom_sensitive_page == Some(page) && zoom > 1.0 {
            return Err(CaptureError::ScreenshotFailed("zoomed render failed".into()).into());
        }

        let width = if self.script.blank_page == Some(page) {
            8
        } else {
            frame_width(page)
        };
        let frame = png_frame(width, 60);

        let mut state = self.state.lock();
        state.zooms_seen.push(zoom);
        if self.script.close_after == Some(page) {
            state.open = false;
        }
        Ok(frame)
    }
}

pub struct FakeProvider(pub Arc<FakeViewer>);

#[async_trait]
impl SurfaceProvider for FakeProvider {
    async fn active_surface(&self) -> Result<Arc<dyn TargetSurface>> {
        Ok(self.0.clone())
    }
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Short timeouts and policies so scenarios finish quickly
pub fn fast_config() -> pagecast::capture::OrchestratorConfigBuilder {
    OrchestratorConfig::builder()
        .ready_poll(RetryPolicy::fixed(2, ms(10)))
        .capture_retry(RetryPolicy::fixed(2, ms(10)))
        .blank_retry(RetryPolicy::escalating(2, ms(10), ms(10)))
        .message_timeout(ms(500))
        .inject_settle(ms(10))
        .turn_timeout(ms(200))
        .heartbeat_interval(Duration::from_secs(60))
        .blank_detector(Arc::new(NarrowFrameDetector))
}

/// Orchestrator over `viewer` delivering into the returned sink
pub fn orchestrator(
    viewer: Arc<FakeViewer>,
    config: OrchestratorConfig,
) -> (Arc<CaptureOrchestrator>, MemorySink) {
    let sink = MemorySink::new();
    let orchestrator = CaptureOrchestrator::new(
        Arc::new(FakeProvider(viewer)),
        Arc::new(sink.clone()),
        Arc::new(NoopKeepAlive),
        config,
    );
    (Arc::new(orchestrator), sink)
}
