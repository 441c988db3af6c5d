//! CDP-backed target surface
//!
//! [`CdpSurface`] adapts one browser tab to the [`TargetSurface`] seam the
//! orchestrator drives. [`ActivePageProvider`] picks the tab, and
//! [`BrowserKeepAlive`] keeps the DevTools connection busy while a session
//! runs.

use super::capture::PageCapture;
use super::navigation::{forward_side, parse_page_label, PageNavigator, Side};
use super::readiness::{
    probe_call, probe_presence_check, ReadinessCriteria, ReadinessSignals, SignalArgs,
    DEFAULT_LOADING_SELECTORS, PROBE_SCRIPT,
};
use crate::capture::{
    Direction, KeepAlive, PageInfo, SurfaceProvider, TargetSurface, TurnOutcome,
};
use crate::error::{Error, Result, SurfaceError};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::browser::GetVersionParams;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::{Browser, Page};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Viewer-specific selectors
///
/// All selectors are optional; without them navigation falls back to edge
/// clicks and page position is unknown.
#[derive(Debug, Clone)]
pub struct ViewerProfile {
    /// Control that turns toward the left
    pub left_control: Option<String>,
    /// Control that turns toward the right
    pub right_control: Option<String>,
    /// Element whose text shows the page position (e.g. "12 / 240")
    pub page_label: Option<String>,
    /// Elements that indicate loading while visible
    pub loading_selectors: Vec<String>,
    /// Readiness thresholds
    pub criteria: ReadinessCriteria,
    /// Hard cap on one readiness round-trip; expiry counts as ready
    pub probe_timeout: Duration,
}

impl Default for ViewerProfile {
    fn default() -> Self {
        Self {
            left_control: None,
            right_control: None,
            page_label: None,
            loading_selectors: DEFAULT_LOADING_SELECTORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            criteria: ReadinessCriteria::default(),
            probe_timeout: Duration::from_millis(2000),
        }
    }
}

impl ViewerProfile {
    /// Control selector for a turn toward `direction`
    pub fn control_for(&self, direction: Direction) -> Option<&str> {
        match forward_side(direction) {
            Side::Left => self.left_control.as_deref(),
            Side::Right => self.right_control.as_deref(),
        }
    }
}

/// One browser tab as a capture target
pub struct CdpSurface {
    page: Page,
    profile: Arc<ViewerProfile>,
}

impl CdpSurface {
    /// Wrap a tab
    pub fn new(page: Page, profile: Arc<ViewerProfile>) -> Self {
        Self { page, profile }
    }

    /// Underlying chromiumoxide page
    pub fn inner(&self) -> &Page {
        &self.page
    }

    async fn signals(&self) -> Result<ReadinessSignals> {
        let call = probe_call(
            "signals",
            &SignalArgs {
                loading_selectors: &self.profile.loading_selectors,
            },
        )?;
        self.page
            .evaluate(call.as_str())
            .await
            .map_err(|e| Error::cdp(e.to_string()))?
            .into_value()
            .map_err(|e| Error::cdp(format!("Bad signals reply: {}", e)))
    }
}

#[async_trait]
impl TargetSurface for CdpSurface {
    fn id(&self) -> String {
        self.page.target_id().inner().clone()
    }

    async fn url(&self) -> Result<String> {
        self.page
            .url()
            .await?
            .ok_or_else(|| SurfaceError::NoActiveSurface.into())
    }

    async fn is_open(&self) -> bool {
        self.page.evaluate("1").await.is_ok()
    }

    async fn ping(&self) -> Result<bool> {
        let check = probe_presence_check();
        let present: bool = self
            .page
            .evaluate(check.as_str())
            .await
            .map_err(|e| Error::cdp(e.to_string()))?
            .into_value()
            .unwrap_or(false);
        Ok(present)
    }

    #[instrument(skip(self))]
    async fn inject_probe(&self) -> Result<()> {
        let params = AddScriptToEvaluateOnNewDocumentParams::builder()
            .source(PROBE_SCRIPT)
            .build()
            .map_err(|e| Error::cdp(format!("Failed to build script params: {}", e)))?;
        self.page
            .execute(params)
            .await
            .map_err(|e| Error::cdp(format!("Failed to register probe: {}", e)))?;

        self.page
            .evaluate(PROBE_SCRIPT)
            .await
            .map_err(|e| SurfaceError::CapabilityUnavailable(e.to_string()))?;
        debug!("Probe injected");
        Ok(())
    }

    async fn turn_page(&self, direction: Direction, timeout: Duration) -> Result<TurnOutcome> {
        let label = self.profile.page_label.as_deref();
        match tokio::time::timeout(timeout, PageNavigator::press_key(&self.page, direction, label))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(SurfaceError::Timeout(timeout.as_millis() as u64).into()),
        }
    }

    async fn turn_page_click(
        &self,
        direction: Direction,
        timeout: Duration,
    ) -> Result<TurnOutcome> {
        let control = self.profile.control_for(direction);
        match tokio::time::timeout(
            timeout,
            PageNavigator::click_turn(&self.page, direction, control),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SurfaceError::Timeout(timeout.as_millis() as u64).into()),
        }
    }

    async fn page_info(&self) -> Result<PageInfo> {
        let label = PageNavigator::page_label(&self.page, self.profile.page_label.as_deref()).await?;
        Ok(label
            .as_deref()
            .map(parse_page_label)
            .unwrap_or_default())
    }

    async fn is_content_ready(&self) -> Result<bool> {
        match tokio::time::timeout(self.profile.probe_timeout, self.signals()).await {
            Ok(Ok(signals)) => {
                let report = signals.evaluate(&self.profile.criteria);
                if !report.is_ready() {
                    debug!(reasons = ?report.reasons, "Content not ready");
                }
                Ok(report.is_ready())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                debug!("Readiness probe timed out, treating as ready");
                Ok(true)
            }
        }
    }

    async fn set_zoom(&self, factor: f64) -> Result<()> {
        PageCapture::set_device_scale(&self.page, factor).await
    }

    async fn capture_visible(&self) -> Result<Vec<u8>> {
        PageCapture::visible_png(&self.page).await
    }
}

/// Picks the tab to capture from a connected browser
pub struct ActivePageProvider {
    browser: Arc<Browser>,
    profile: Arc<ViewerProfile>,
    url_filter: Option<String>,
}

impl ActivePageProvider {
    /// Provider over `browser`'s tabs
    pub fn new(browser: Arc<Browser>, profile: ViewerProfile) -> Self {
        Self {
            browser,
            profile: Arc::new(profile),
            url_filter: None,
        }
    }

    /// Only consider tabs whose URL contains `needle`
    pub fn with_url_filter<S: Into<String>>(mut self, needle: S) -> Self {
        self.url_filter = Some(needle.into());
        self
    }
}

#[async_trait]
impl SurfaceProvider for ActivePageProvider {
    /// The most recently opened http(s) tab matching the filter
    async fn active_surface(&self) -> Result<Arc<dyn TargetSurface>> {
        let pages = self.browser.pages().await?;
        for page in pages.into_iter().rev() {
            let Ok(Some(url)) = page.url().await else {
                continue;
            };
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                continue;
            }
            if let Some(needle) = &self.url_filter {
                if !url.contains(needle.as_str()) {
                    continue;
                }
            }
            info!(url = %url, "Selected target tab");
            return Ok(Arc::new(CdpSurface::new(page, self.profile.clone())));
        }
        warn!("No capturable tab found");
        Err(SurfaceError::NoActiveSurface.into())
    }
}

/// Keeps the DevTools websocket busy with `Browser.getVersion`
pub struct BrowserKeepAlive {
    browser: Arc<Browser>,
}

impl BrowserKeepAlive {
    /// Keep-alive over `browser`
    pub fn new(browser: Arc<Browser>) -> Self {
        Self { browser }
    }
}

#[async_trait]
impl KeepAlive for BrowserKeepAlive {
    async fn touch(&self) -> Result<()> {
        let version = self.browser.execute(GetVersionParams::default()).await?;
        debug!(product = %version.result.product, "Keep-alive");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_defaults() {
        let profile = ViewerProfile::default();
        assert!(profile.left_control.is_none());
        assert!(!profile.loading_selectors.is_empty());
        assert_eq!(profile.probe_timeout, Duration::from_millis(2000));
    }

    #[test]
    fn test_control_for_direction() {
        let profile = ViewerProfile {
            left_control: Some("#prev".into()),
            right_control: Some("#next".into()),
            ..Default::default()
        };
        assert_eq!(profile.control_for(Direction::ForwardIsRight), Some("#next"));
        assert_eq!(profile.control_for(Direction::ForwardIsLeft), Some("#prev"));
        assert_eq!(
            profile.control_for(Direction::ForwardIsRight.reversed()),
            Some("#prev")
        );
    }
}
