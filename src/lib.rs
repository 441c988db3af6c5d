//! Pagecast - Paginated Document Viewer Capture
//!
//! This crate drives a paginated document viewer in a browser tab page by
//! page, captures each rendered page once it is stable, and assembles the
//! frames into a single PDF.
//!
//! # Features
//!
//! - **Capture Orchestrator**: navigate, await readiness, capture, verify, retry
//! - **Browser Integration**: readiness probe, page turning and zoom via ChromiumOxide (CDP)
//! - **Frame Processor**: crop/resize, chunked batches and PDF assembly off the async runtime
//! - **Control Protocol**: JSON-RPC stdio server with progress notifications
//!
//! # Architecture
//!
//! ```text
//! Client ──▶ Protocol Server ──▶ Capture Orchestrator ──▶ Target Surface (CDP)
//!                  ▲                     │
//!                  │                     ▼
//!            notifications        ┌──────────────┐
//!                  │              │ Frame        │
//!                  └──────────────│ Processor    │──▶ Delivery Sink (PDF)
//!                                 └──────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use pagecast::browser::{BrowserController, ViewerProfile};
//! use pagecast::capture::{CaptureOrchestrator, OrchestratorConfig, SessionConfig};
//! use pagecast::delivery::FileSink;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let controller = BrowserController::connect("ws://127.0.0.1:9222/devtools/browser/id").await?;
//!
//!     let orchestrator = CaptureOrchestrator::new(
//!         Arc::new(controller.provider(ViewerProfile::default())),
//!         Arc::new(FileSink::from_env()),
//!         Arc::new(controller.keep_alive()),
//!         OrchestratorConfig::default(),
//!     );
//!
//!     let outcome = orchestrator.start(SessionConfig::for_range(1, 10)).await?.await?;
//!     println!("Captured {} pages", outcome.captured);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod browser;
pub mod capture;
pub mod delivery;
pub mod error;
pub mod metrics;
pub mod processor;
pub mod protocol;

// Re-exports for convenience
pub use browser::BrowserController;
pub use capture::{CaptureOrchestrator, OrchestratorConfig, SessionConfig};
pub use error::{Error, Result};
pub use protocol::ProtocolServer;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
