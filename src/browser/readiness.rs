//! Readiness detection
//!
//! The probe script installed into the viewer page only gathers raw signals
//! (time since the last visible mutation, pending images, canvas pixel
//! samples, visible loading indicators). The decision is made here, in
//! [`ReadinessSignals::evaluate`], so it can be tested without a browser.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bumped whenever the probe's surface changes; a stale probe is reinstalled
pub const PROBE_VERSION: u32 = 1;

/// Global the probe installs itself under
pub const PROBE_GLOBAL: &str = "__pagecast";

/// Default loading-indicator selectors
pub const DEFAULT_LOADING_SELECTORS: &[&str] = &[
    "[aria-busy='true']",
    ".loading",
    ".spinner",
    ".loader",
    "[class*='loading-indicator']",
];

/// Probe script installed as `window.__pagecast`
///
/// Every entry point takes a single JSON argument and returns JSON.
pub const PROBE_SCRIPT: &str = r#"
(() => {
  if (window.__pagecast && window.__pagecast.version === 1) return;

  const state = { lastMutation: Date.now() };

  const visible = (el) => {
    if (!el || !el.getBoundingClientRect) return false;
    const r = el.getBoundingClientRect();
    if (r.width <= 0 || r.height <= 0) return false;
    if (r.bottom < 0 || r.right < 0) return false;
    if (r.top > window.innerHeight || r.left > window.innerWidth) return false;
    const style = window.getComputedStyle(el);
    return style.visibility !== 'hidden' && style.display !== 'none' && style.opacity !== '0';
  };

  const observe = () => {
    const root = document.body || document.documentElement;
    if (!root) return false;
    new MutationObserver((records) => {
      for (const rec of records) {
        const el = rec.target.nodeType === 1 ? rec.target : rec.target.parentElement;
        if (visible(el)) { state.lastMutation = Date.now(); return; }
      }
    }).observe(root, { subtree: true, childList: true, attributes: true, characterData: true });
    return true;
  };
  if (!observe()) document.addEventListener('DOMContentLoaded', observe, { once: true });

  const sampleCanvas = (c) => {
    try {
      const ctx = c.getContext('2d');
      if (!ctx) return null;
      const pts = [[0.5, 0.5], [1 / 3, 1 / 3], [2 / 3, 2 / 3]];
      return pts.map(([fx, fy]) => {
        const x = Math.min(c.width - 1, Math.floor(c.width * fx));
        const y = Math.min(c.height - 1, Math.floor(c.height * fy));
        return Array.from(ctx.getImageData(x, y, 1, 1).data);
      });
    } catch (e) {
      return null;
    }
  };

  const label = (sel) => {
    if (!sel) return null;
    const el = document.querySelector(sel);
    if (!el) return null;
    const text = (el.value !== undefined && el.value !== '') ? String(el.value) : el.textContent;
    return text ? text.trim() : null;
  };

  window.__pagecast = {
    version: 1,

    ping() { return { ready: true }; },

    signals(args) {
      const imgs = Array.from(document.images).filter(visible);
      const canvases = Array.from(document.querySelectorAll('canvas')).filter(visible);
      const loading = (args.loadingSelectors || []).reduce((n, sel) => {
        try { return n + Array.from(document.querySelectorAll(sel)).filter(visible).length; }
        catch (e) { return n; }
      }, 0);
      return {
        msSinceMutation: Date.now() - state.lastMutation,
        visibleImages: imgs.length,
        pendingImages: imgs.filter((i) => !i.complete || i.naturalWidth === 0).length,
        canvases: canvases.map((c) => ({
          width: c.width,
          height: c.height,
          samples: (c.width > 0 && c.height > 0) ? sampleCanvas(c) : null,
        })),
        loadingIndicators: loading,
      };
    },

    pageInfo(args) {
      return { label: label(args.labelSelector) };
    },

    async keyTurn(args) {
      const before = label(args.labelSelector);
      const target = document.activeElement || document.body || document;
      const init = { key: args.key, code: args.key, keyCode: args.keyCode, which: args.keyCode,
                     bubbles: true, cancelable: true };
      const down = new KeyboardEvent('keydown', init);
      target.dispatchEvent(down);
      target.dispatchEvent(new KeyboardEvent('keyup', init));
      await new Promise((r) => setTimeout(r, args.settleMs || 0));
      const after = label(args.labelSelector);
      return {
        handled: down.defaultPrevented || (before !== null && after !== null && before !== after),
        label: after,
      };
    },

    clickControl(args) {
      if (!args.selector) return { clicked: false };
      const el = document.querySelector(args.selector);
      if (!el || !visible(el) || el.disabled) return { clicked: false };
      el.click();
      return { clicked: true };
    },

    viewport() {
      return { width: window.innerWidth, height: window.innerHeight };
    },
  };
})();
"#;

/// One visible canvas as reported by the probe
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasSignal {
    /// Backing-store width
    pub width: u32,
    /// Backing-store height
    pub height: u32,
    /// RGBA samples; `None` when the canvas is tainted or has no 2d context
    #[serde(default)]
    pub samples: Option<Vec<[u8; 4]>>,
}

/// Raw readiness signals gathered by the probe
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessSignals {
    /// Milliseconds since the last mutation in the visible region
    #[serde(default)]
    pub ms_since_mutation: Option<u64>,
    /// Visible `<img>` elements
    #[serde(default)]
    pub visible_images: u32,
    /// Visible images not yet decoded
    #[serde(default)]
    pub pending_images: u32,
    /// Visible canvases
    #[serde(default)]
    pub canvases: Vec<CanvasSignal>,
    /// Visible elements matching a loading selector
    #[serde(default)]
    pub loading_indicators: u32,
}

/// Thresholds applied to [`ReadinessSignals`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessCriteria {
    /// Required calm period since the last visible mutation
    pub quiet_window: Duration,
    /// A channel at or above this counts as white
    pub near_white: u8,
    /// Alpha below this counts as transparent
    pub transparent_alpha: u8,
}

impl Default for ReadinessCriteria {
    fn default() -> Self {
        Self {
            quiet_window: Duration::from_millis(300),
            near_white: 245,
            transparent_alpha: 10,
        }
    }
}

impl ReadinessCriteria {
    /// Whether a sampled pixel shows drawn content
    pub fn is_contentful(&self, [r, g, b, a]: [u8; 4]) -> bool {
        if a < self.transparent_alpha {
            return false;
        }
        !(r >= self.near_white && g >= self.near_white && b >= self.near_white)
    }
}

/// Why the page is not considered rendered yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum NotReadyReason {
    /// DOM still changing inside the viewport
    Mutating {
        /// Time since the last mutation
        since_ms: u64,
    },
    /// Images still loading
    ImagesPending {
        /// Count of undecoded images
        count: u32,
    },
    /// A canvas with zero size
    EmptyCanvas {
        /// Position among visible canvases
        index: usize,
    },
    /// A canvas whose samples are all white or transparent
    BlankCanvas {
        /// Position among visible canvases
        index: usize,
    },
    /// A loading indicator is visible
    LoadingIndicator {
        /// Matching elements
        count: u32,
    },
}

/// Outcome of a readiness evaluation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReadinessReport {
    /// Every failing check; empty means ready
    pub reasons: Vec<NotReadyReason>,
}

impl ReadinessReport {
    /// True when no check failed
    pub fn is_ready(&self) -> bool {
        self.reasons.is_empty()
    }
}

impl ReadinessSignals {
    /// Apply `criteria` to these signals
    pub fn evaluate(&self, criteria: &ReadinessCriteria) -> ReadinessReport {
        let mut reasons = Vec::new();

        if let Some(since) = self.ms_since_mutation {
            if since < criteria.quiet_window.as_millis() as u64 {
                reasons.push(NotReadyReason::Mutating { since_ms: since });
            }
        }

        if self.pending_images > 0 {
            reasons.push(NotReadyReason::ImagesPending {
                count: self.pending_images,
            });
        }

        for (index, canvas) in self.canvases.iter().enumerate() {
            if canvas.width == 0 || canvas.height == 0 {
                reasons.push(NotReadyReason::EmptyCanvas { index });
                continue;
            }
            // unreadable (tainted) canvases do not block
            let Some(samples) = canvas.samples.as_deref() else {
                continue;
            };
            if !samples.is_empty() && !samples.iter().any(|px| criteria.is_contentful(*px)) {
                reasons.push(NotReadyReason::BlankCanvas { index });
            }
        }

        if self.loading_indicators > 0 {
            reasons.push(NotReadyReason::LoadingIndicator {
                count: self.loading_indicators,
            });
        }

        ReadinessReport { reasons }
    }
}

/// Arguments for the probe's `signals` entry point
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SignalArgs<'a> {
    pub loading_selectors: &'a [String],
}

/// Build `window.__pagecast.<method>(<args>)` with JSON-encoded args
pub(crate) fn probe_call<T: Serialize>(method: &str, args: &T) -> crate::error::Result<String> {
    let json = serde_json::to_string(args)?;
    Ok(format!("window.{}.{}({})", PROBE_GLOBAL, method, json))
}

/// Expression answering whether the current probe is installed
pub(crate) fn probe_presence_check() -> String {
    format!(
        "(typeof window.{g} === 'object' && window.{g} !== null && window.{g}.version === {v})",
        g = PROBE_GLOBAL,
        v = PROBE_VERSION
    )
}
