//! Visible-region capture and zoom control
//!
//! Zoom is applied as a device-scale-factor override so the viewer renders
//! at higher resolution without changing its CSS layout. Clearing the
//! override restores the original scale and is idempotent.

use crate::error::{CaptureError, Error, Result};
use chromiumoxide::cdp::browser_protocol::emulation::{
    ClearDeviceMetricsOverrideParams, SetDeviceMetricsOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use serde::Deserialize;
use tracing::{debug, instrument};

/// CSS viewport size as seen by the page
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CssViewport {
    /// `window.innerWidth`
    pub width: i64,
    /// `window.innerHeight`
    pub height: i64,
}

/// Capture helpers over a CDP page
pub struct PageCapture;

impl PageCapture {
    /// PNG of the visible viewport
    #[instrument(skip(page))]
    pub async fn visible_png(page: &Page) -> Result<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .from_surface(true)
            .capture_beyond_viewport(false)
            .build();

        let data = page
            .screenshot(params)
            .await
            .map_err(|e| CaptureError::ScreenshotFailed(e.to_string()))?;

        debug!("Screenshot captured: {} bytes", data.len());
        Ok(data)
    }

    /// Current CSS viewport
    pub async fn viewport(page: &Page) -> Result<CssViewport> {
        page.evaluate("({ width: window.innerWidth, height: window.innerHeight })")
            .await
            .map_err(|e| Error::cdp(e.to_string()))?
            .into_value()
            .map_err(|e| Error::cdp(format!("Bad viewport reply: {}", e)))
    }

    /// Render at `factor` times the device scale; `factor <= 1.0` restores
    #[instrument(skip(page))]
    pub async fn set_device_scale(page: &Page, factor: f64) -> Result<()> {
        if factor <= 1.0 {
            page.execute(ClearDeviceMetricsOverrideParams::default())
                .await
                .map_err(|e| CaptureError::ZoomFailed(e.to_string()))?;
            debug!("Device scale restored");
            return Ok(());
        }

        let viewport = Self::viewport(page).await?;
        let params = SetDeviceMetricsOverrideParams::builder()
            .width(viewport.width)
            .height(viewport.height)
            .device_scale_factor(factor)
            .mobile(false)
            .build()
            .map_err(|e| CaptureError::ZoomFailed(e))?;
        page.execute(params)
            .await
            .map_err(|e| CaptureError::ZoomFailed(e.to_string()))?;
        debug!(factor, "Device scale applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_deserialize() {
        let viewport: CssViewport =
            serde_json::from_str(r#"{"width": 1280, "height": 720}"#).unwrap();
        assert_eq!(viewport.width, 1280);
        assert_eq!(viewport.height, 720);
    }
}
