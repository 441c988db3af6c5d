//! The capability seam between the orchestrator and the viewed page
//!
//! The orchestrator never touches CDP directly. It speaks to a
//! [`TargetSurface`], which bundles the page navigator, the readiness probe
//! and the screenshot/zoom primitives for one tab. The CDP implementation
//! lives in [`crate::browser::surface`]; tests drive the loop with scripted
//! fakes.

use super::session::Direction;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// What the viewer exposes about its current position
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    /// Current page number, when the viewer shows one
    #[serde(default)]
    pub current: Option<u32>,
    /// Total page count, when known
    #[serde(default)]
    pub total: Option<u32>,
    /// Raw location label (e.g. "Page 12 of 300")
    #[serde(default)]
    pub label: Option<String>,
}

/// How a page turn was dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NavigationMethod {
    /// Synthetic key press consumed by the viewer
    Key,
    /// Click on the viewer's own next/prev control
    ControlClick,
    /// Click near the viewport edge
    EdgeClick,
}

/// Reply to `turnPage` / `turnPageClick`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    /// Whether a navigation command was dispatched
    pub success: bool,
    /// Method that dispatched it
    #[serde(default)]
    pub method: Option<NavigationMethod>,
    /// Position after the turn, if the probe could read it
    #[serde(default)]
    pub page_info: Option<PageInfo>,
}

impl TurnOutcome {
    /// A dispatched turn
    pub fn dispatched(method: NavigationMethod, page_info: Option<PageInfo>) -> Self {
        Self {
            success: true,
            method: Some(method),
            page_info,
        }
    }

    /// Nothing handled the turn
    pub fn not_handled() -> Self {
        Self {
            success: false,
            method: None,
            page_info: None,
        }
    }
}

/// One tab showing the document viewer
#[async_trait]
pub trait TargetSurface: Send + Sync {
    /// Stable id of the tab (CDP target id)
    fn id(&self) -> String;

    /// URL currently shown
    async fn url(&self) -> Result<String>;

    /// Whether the tab still exists
    async fn is_open(&self) -> bool;

    /// `ping{} -> {ready}`: whether the probe is installed and answering
    async fn ping(&self) -> Result<bool>;

    /// Install the navigator/readiness probe
    async fn inject_probe(&self) -> Result<()>;

    /// `turnPage`: key press first, click fallback when not handled
    async fn turn_page(&self, direction: Direction, timeout: Duration) -> Result<TurnOutcome>;

    /// `turnPageClick`: click-based navigation only
    async fn turn_page_click(&self, direction: Direction, timeout: Duration)
        -> Result<TurnOutcome>;

    /// `getPageInfo`
    async fn page_info(&self) -> Result<PageInfo>;

    /// `isContentReady`; fails open on its own hard timeout
    async fn is_content_ready(&self) -> Result<bool>;

    /// Apply a device scale factor; 1.0 restores the unzoomed state
    async fn set_zoom(&self, factor: f64) -> Result<()>;

    /// Screenshot of the visible region as encoded bytes
    async fn capture_visible(&self) -> Result<Vec<u8>>;
}

/// Resolves the surface a new session should bind to
#[async_trait]
pub trait SurfaceProvider: Send + Sync {
    /// The currently active tab
    async fn active_surface(&self) -> Result<Arc<dyn TargetSurface>>;
}

/// Existence-preservation hook poked by the heartbeat
#[async_trait]
pub trait KeepAlive: Send + Sync {
    /// Do the smallest round-trip that keeps the host connection alive
    async fn touch(&self) -> Result<()>;
}

/// A keep-alive that does nothing, for hosts that never idle out
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopKeepAlive;

#[async_trait]
impl KeepAlive for NoopKeepAlive {
    async fn touch(&self) -> Result<()> {
        Ok(())
    }
}
