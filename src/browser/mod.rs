//! Browser integration
//!
//! CDP implementations of the capture seams: launching or attaching to
//! Chrome, the injected readiness probe, page turning and zoomed capture.

pub mod capture;
pub mod controller;
pub mod navigation;
pub mod readiness;
pub mod surface;

pub use capture::PageCapture;
pub use controller::{BrowserConfig, BrowserConfigBuilder, BrowserController};
pub use navigation::{parse_page_label, PageNavigator};
pub use readiness::{
    NotReadyReason, ReadinessCriteria, ReadinessReport, ReadinessSignals, PROBE_SCRIPT,
};
pub use surface::{ActivePageProvider, BrowserKeepAlive, CdpSurface, ViewerProfile};
