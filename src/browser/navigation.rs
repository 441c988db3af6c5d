//! Page turning
//!
//! The navigator is stateless: it dispatches one turn and reports whether
//! the command was taken, never waiting for the viewer to settle. Keys are
//! tried first (through the probe, so `defaultPrevented` can be observed);
//! clicks on a configured control or on the viewport edge are the fallback.

use super::readiness::probe_call;
use crate::capture::{Direction, NavigationMethod, PageInfo, TurnOutcome};
use crate::error::{Error, Result};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
};
use chromiumoxide::Page;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Fraction of the viewport width kept between an edge click and the edge
pub const EDGE_INSET: f64 = 0.05;

/// Settle time the probe waits before re-reading the page label after a key
const KEY_SETTLE_MS: u64 = 150;

/// Screen side of a page turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Left half of the viewer
    Left,
    /// Right half of the viewer
    Right,
}

/// Side that moves one page forward in `direction`
pub fn forward_side(direction: Direction) -> Side {
    match direction {
        Direction::ForwardIsRight => Side::Right,
        Direction::ForwardIsLeft => Side::Left,
    }
}

/// Key name and legacy key code for turning toward `direction`
pub fn key_for(direction: Direction) -> (&'static str, u32) {
    match forward_side(direction) {
        Side::Right => ("ArrowRight", 39),
        Side::Left => ("ArrowLeft", 37),
    }
}

/// Viewport point for an edge click toward `direction`
pub fn edge_point(direction: Direction, width: f64, height: f64) -> (f64, f64) {
    let x = match forward_side(direction) {
        Side::Right => width * (1.0 - EDGE_INSET),
        Side::Left => width * EDGE_INSET,
    };
    (x, height / 2.0)
}

/// Parse a page indicator such as `"12 / 240"` or `"Page 12 of 240"`
pub fn parse_page_label(label: &str) -> PageInfo {
    let mut numbers = label
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<u32>().ok());
    PageInfo {
        current: numbers.next(),
        total: numbers.next(),
        label: Some(label.to_string()),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KeyTurnArgs<'a> {
    key: &'a str,
    key_code: u32,
    label_selector: Option<&'a str>,
    settle_ms: u64,
}

#[derive(Debug, Deserialize)]
struct KeyTurnReply {
    handled: bool,
    #[serde(default)]
    label: Option<String>,
}

#[derive(Serialize)]
struct ClickArgs<'a> {
    selector: Option<&'a str>,
}

#[derive(Deserialize)]
struct ClickReply {
    clicked: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LabelArgs<'a> {
    label_selector: Option<&'a str>,
}

#[derive(Deserialize)]
struct LabelReply {
    #[serde(default)]
    label: Option<String>,
}

#[derive(Deserialize)]
struct Viewport {
    width: f64,
    height: f64,
}

/// Stateless page-turn capability over a CDP page
pub struct PageNavigator;

impl PageNavigator {
    /// Dispatch the direction's arrow key inside the page
    ///
    /// Succeeds when the viewer consumed the key or its page label changed.
    #[instrument(skip(page))]
    pub async fn press_key(
        page: &Page,
        direction: Direction,
        label_selector: Option<&str>,
    ) -> Result<TurnOutcome> {
        let (key, key_code) = key_for(direction);
        let call = probe_call(
            "keyTurn",
            &KeyTurnArgs {
                key,
                key_code,
                label_selector,
                settle_ms: KEY_SETTLE_MS,
            },
        )?;
        let reply: KeyTurnReply = page
            .evaluate(call.as_str())
            .await
            .map_err(|e| Error::cdp(e.to_string()))?
            .into_value()
            .map_err(|e| Error::cdp(format!("Bad keyTurn reply: {}", e)))?;

        debug!(key, handled = reply.handled, "Key dispatched");
        if reply.handled {
            Ok(TurnOutcome::dispatched(
                NavigationMethod::Key,
                reply.label.as_deref().map(parse_page_label),
            ))
        } else {
            Ok(TurnOutcome::not_handled())
        }
    }

    /// Click the element matched by `selector` if it is visible and enabled
    #[instrument(skip(page))]
    pub async fn click_control(page: &Page, selector: &str) -> Result<bool> {
        let call = probe_call(
            "clickControl",
            &ClickArgs {
                selector: Some(selector),
            },
        )?;
        let reply: ClickReply = page
            .evaluate(call.as_str())
            .await
            .map_err(|e| Error::cdp(e.to_string()))?
            .into_value()
            .map_err(|e| Error::cdp(format!("Bad clickControl reply: {}", e)))?;
        Ok(reply.clicked)
    }

    /// Trusted mouse click near the viewport edge
    #[instrument(skip(page))]
    pub async fn click_edge(page: &Page, direction: Direction) -> Result<()> {
        let viewport: Viewport = page
            .evaluate("({ width: window.innerWidth, height: window.innerHeight })")
            .await
            .map_err(|e| Error::cdp(e.to_string()))?
            .into_value()
            .map_err(|e| Error::cdp(format!("Bad viewport reply: {}", e)))?;
        let (x, y) = edge_point(direction, viewport.width, viewport.height);
        debug!("Edge click at ({:.0}, {:.0})", x, y);

        let moved = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseMoved)
            .x(x)
            .y(y)
            .build()
            .map_err(Error::cdp)?;
        page.execute(moved).await?;

        for kind in [
            DispatchMouseEventType::MousePressed,
            DispatchMouseEventType::MouseReleased,
        ] {
            let params = DispatchMouseEventParams::builder()
                .r#type(kind)
                .x(x)
                .y(y)
                .button(MouseButton::Left)
                .click_count(1)
                .build()
                .map_err(Error::cdp)?;
            page.execute(params).await?;
        }
        Ok(())
    }

    /// Control click when a selector is configured and found, else edge click
    pub async fn click_turn(
        page: &Page,
        direction: Direction,
        control_selector: Option<&str>,
    ) -> Result<TurnOutcome> {
        if let Some(selector) = control_selector {
            if Self::click_control(page, selector).await? {
                return Ok(TurnOutcome::dispatched(NavigationMethod::ControlClick, None));
            }
            debug!(selector, "Control not clickable, using edge click");
        }
        Self::click_edge(page, direction).await?;
        Ok(TurnOutcome::dispatched(NavigationMethod::EdgeClick, None))
    }

    /// Current page indicator text
    pub async fn page_label(page: &Page, label_selector: Option<&str>) -> Result<Option<String>> {
        let call = probe_call("pageInfo", &LabelArgs { label_selector })?;
        let reply: LabelReply = page
            .evaluate(call.as_str())
            .await
            .map_err(|e| Error::cdp(e.to_string()))?
            .into_value()
            .map_err(|e| Error::cdp(format!("Bad pageInfo reply: {}", e)))?;
        Ok(reply.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // Direction Mapping Tests
    // ========================================================================

    #[test]
    fn test_key_mapping() {
        assert_eq!(key_for(Direction::ForwardIsRight).0, "ArrowRight");
        assert_eq!(key_for(Direction::ForwardIsLeft).0, "ArrowLeft");
        assert_eq!(key_for(Direction::ForwardIsRight.reversed()).0, "ArrowLeft");
        assert_eq!(key_for(Direction::ForwardIsLeft.reversed()).1, 39);
    }

    #[test]
    fn test_edge_point() {
        let (x, y) = edge_point(Direction::ForwardIsRight, 1000.0, 800.0);
        assert!((x - 950.0).abs() < f64::EPSILON);
        assert!((y - 400.0).abs() < f64::EPSILON);

        let (x, _) = edge_point(Direction::ForwardIsLeft, 1000.0, 800.0);
        assert!((x - 50.0).abs() < f64::EPSILON);
    }

    // ========================================================================
    // Page Label Tests
    // ========================================================================

    #[test]
    fn test_parse_page_label() {
        let info = parse_page_label("12 / 240");
        assert_eq!(info.current, Some(12));
        assert_eq!(info.total, Some(240));

        let info = parse_page_label("Page 3 of 9");
        assert_eq!(info.current, Some(3));
        assert_eq!(info.total, Some(9));
    }

    #[test]
    fn test_parse_page_label_without_numbers() {
        let info = parse_page_label("Cover");
        assert_eq!(info.current, None);
        assert_eq!(info.label.as_deref(), Some("Cover"));
    }

    #[test]
    fn test_key_turn_args_shape() {
        let json = serde_json::to_value(KeyTurnArgs {
            key: "ArrowLeft",
            key_code: 37,
            label_selector: None,
            settle_ms: 150,
        })
        .unwrap();
        assert_eq!(json["keyCode"], 37);
        assert!(json["labelSelector"].is_null());
    }
}
