//! Browser lifecycle management
//!
//! Launches Chrome or attaches to a running instance over its DevTools
//! websocket, and hands out the surface provider and keep-alive the
//! orchestrator needs.

use super::surface::{ActivePageProvider, BrowserKeepAlive, ViewerProfile};
use crate::error::{BrowserError, Result};
use chromiumoxide::browser::{Browser, BrowserConfig as CdpBrowserConfig};
use chromiumoxide::handler::Handler;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Configuration for browser launch
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Run in headless mode (default: false; viewers usually need a login)
    pub headless: bool,
    /// Browser window width (default: 1280)
    pub width: u32,
    /// Browser window height (default: 1600)
    pub height: u32,
    /// Enable sandbox (default: true)
    pub sandbox: bool,
    /// Page load timeout in milliseconds (default: 30000)
    pub timeout_ms: u64,
    /// Path to Chrome/Chromium executable (None = auto-detect)
    pub chrome_path: Option<String>,
    /// Additional Chrome arguments
    pub extra_args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: false,
            width: 1280,
            height: 1600,
            sandbox: true,
            timeout_ms: 30000,
            chrome_path: None,
            extra_args: Vec::new(),
        }
    }
}

impl BrowserConfig {
    /// Create a new config builder
    pub fn builder() -> BrowserConfigBuilder {
        BrowserConfigBuilder::default()
    }
}

/// Builder for BrowserConfig
#[derive(Default)]
pub struct BrowserConfigBuilder {
    config: BrowserConfig,
}

impl BrowserConfigBuilder {
    /// Set headless mode
    pub fn headless(mut self, headless: bool) -> Self {
        self.config.headless = headless;
        self
    }

    /// Set viewport dimensions
    pub fn viewport(mut self, width: u32, height: u32) -> Self {
        self.config.width = width;
        self.config.height = height;
        self
    }

    /// Enable/disable sandbox
    pub fn sandbox(mut self, sandbox: bool) -> Self {
        self.config.sandbox = sandbox;
        self
    }

    /// Set page load timeout
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeout_ms = ms;
        self
    }

    /// Set Chrome path
    pub fn chrome_path<S: Into<String>>(mut self, path: S) -> Self {
        self.config.chrome_path = Some(path.into());
        self
    }

    /// Add extra Chrome argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.config.extra_args.push(arg.into());
        self
    }

    /// Build the config
    pub fn build(self) -> BrowserConfig {
        self.config
    }
}

/// Owns the browser connection and its event handler task
pub struct BrowserController {
    browser: Arc<Browser>,
    handler: JoinHandle<()>,
    timeout: Duration,
}

impl BrowserController {
    /// Launch a new browser
    #[instrument(skip(config))]
    pub async fn launch(config: BrowserConfig) -> Result<Self> {
        info!("Launching browser: headless={}", config.headless);

        let mut builder = CdpBrowserConfig::builder().viewport(
            chromiumoxide::handler::viewport::Viewport {
                width: config.width,
                height: config.height,
                device_scale_factor: None,
                emulating_mobile: false,
                is_landscape: false,
                has_touch: false,
            },
        );

        if !config.headless {
            builder = builder.with_head();
        }
        if !config.sandbox {
            builder = builder.arg("--no-sandbox");
        }
        if let Some(ref path) = config.chrome_path {
            builder = builder.chrome_executable(path);
        }
        for arg in &config.extra_args {
            builder = builder.arg(arg);
        }

        let cdp_config = builder
            .build()
            .map_err(|e| BrowserError::ConfigError(e.to_string()))?;

        let (browser, handler) = Browser::launch(cdp_config)
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        info!("Browser launched successfully");
        Ok(Self::from_parts(
            browser,
            handler,
            Duration::from_millis(config.timeout_ms),
        ))
    }

    /// Attach to a running browser through its DevTools websocket URL
    #[instrument]
    pub async fn connect(ws_url: &str) -> Result<Self> {
        let (browser, handler) =
            Browser::connect(ws_url)
                .await
                .map_err(|e| BrowserError::ConnectFailed {
                    url: ws_url.to_string(),
                    reason: e.to_string(),
                })?;

        info!("Connected to browser at {}", ws_url);
        Ok(Self::from_parts(
            browser,
            handler,
            Duration::from_millis(BrowserConfig::default().timeout_ms),
        ))
    }

    fn from_parts(browser: Browser, mut handler: Handler, timeout: Duration) -> Self {
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    warn!("Browser handler event error");
                    break;
                }
            }
            debug!("Browser handler finished");
        });

        Self {
            browser: Arc::new(browser),
            handler: handler_task,
            timeout,
        }
    }

    /// Open `url` in a new tab and wait for it to load
    #[instrument(skip(self))]
    pub async fn open(&self, url: &str) -> Result<()> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(BrowserError::ConfigError(format!(
                "URL must start with http:// or https://: {}",
                url
            ))
            .into());
        }

        let page = tokio::time::timeout(self.timeout, self.browser.new_page(url))
            .await
            .map_err(|_| {
                BrowserError::PageCreationFailed(format!(
                    "timed out after {}ms",
                    self.timeout.as_millis()
                ))
            })?
            .map_err(|e| BrowserError::PageCreationFailed(e.to_string()))?;

        if tokio::time::timeout(self.timeout, page.wait_for_navigation())
            .await
            .is_err()
        {
            warn!("Page load did not finish in time, continuing");
        }
        info!("Opened {}", url);
        Ok(())
    }

    /// Shared browser handle
    pub fn browser(&self) -> Arc<Browser> {
        self.browser.clone()
    }

    /// Surface provider over this browser's tabs
    pub fn provider(&self, profile: ViewerProfile) -> ActivePageProvider {
        ActivePageProvider::new(self.browser.clone(), profile)
    }

    /// Keep-alive target for this connection
    pub fn keep_alive(&self) -> BrowserKeepAlive {
        BrowserKeepAlive::new(self.browser.clone())
    }

    /// Close the browser (or detach, if other handles are still alive)
    #[instrument(skip(self))]
    pub async fn close(self) -> Result<()> {
        info!("Closing browser");
        match Arc::try_unwrap(self.browser) {
            Ok(mut browser) => {
                if let Err(e) = browser.close().await {
                    warn!("Browser close failed: {}", e);
                }
            }
            Err(_) => debug!("Browser still shared, detaching"),
        }

        let _ = tokio::time::timeout(Duration::from_secs(5), self.handler).await;
        info!("Browser closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_config_default() {
        let config = BrowserConfig::default();
        assert!(!config.headless);
        assert_eq!(config.width, 1280);
        assert_eq!(config.height, 1600);
        assert!(config.sandbox);
        assert_eq!(config.timeout_ms, 30000);
    }

    #[test]
    fn test_browser_config_builder() {
        let config = BrowserConfig::builder()
            .headless(true)
            .viewport(1024, 768)
            .sandbox(false)
            .timeout_ms(60000)
            .chrome_path("/usr/bin/chromium")
            .arg("--disable-gpu")
            .build();

        assert!(config.headless);
        assert_eq!(config.width, 1024);
        assert_eq!(config.height, 768);
        assert!(!config.sandbox);
        assert_eq!(config.timeout_ms, 60000);
        assert_eq!(config.chrome_path.as_deref(), Some("/usr/bin/chromium"));
        assert_eq!(config.extra_args, vec!["--disable-gpu"]);
    }
}
