//! Capture metrics
//!
//! Atomic counters for the capture pipeline plus a small ring buffer of
//! per-page cycle durations, exported in Prometheus text format through the
//! `getMetrics` command.
//!
//! # Example
//!
//! ```rust,no_run
//! use pagecast::metrics::global_metrics;
//! use std::time::Duration;
//!
//! global_metrics().record_page_captured(Duration::from_millis(1800));
//! let output = global_metrics().to_prometheus_format();
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{OnceLock, RwLock};
use std::time::{Duration, Instant};

/// Maximum number of page-cycle samples kept for percentiles
const MAX_HISTOGRAM_SAMPLES: usize = 1000;

/// Counters for the capture pipeline
#[derive(Debug)]
pub struct CaptureMetrics {
    // === Session counters ===
    /// Sessions that passed validation and started
    pub sessions_started: AtomicU64,
    /// Sessions that delivered a document
    pub sessions_completed: AtomicU64,
    /// Sessions that ended with an error
    pub sessions_failed: AtomicU64,
    /// Sessions ended by a stop request
    pub sessions_stopped: AtomicU64,

    // === Page counters ===
    /// Frames accepted
    pub pages_captured: AtomicU64,
    /// Pages skipped after every capture attempt failed
    pub pages_missing: AtomicU64,
    /// Transport-level capture retries
    pub capture_retries: AtomicU64,
    /// Blank-suspect retries
    pub blank_retries: AtomicU64,
    /// Zoom restorations after a capture attempt
    pub zoom_restores: AtomicU64,
    /// Page turns that needed the click fallback
    pub fallback_clicks: AtomicU64,
    /// Readiness polls that ran out of attempts
    pub readiness_timeouts: AtomicU64,

    // === Gauges ===
    /// Sessions currently running
    pub active_sessions: AtomicU32,

    page_durations: RwLock<RingBuffer<Duration>>,
    errors_by_type: RwLock<HashMap<String, u64>>,
    start_time: RwLock<Option<Instant>>,
}

/// Fixed-capacity sample buffer
#[derive(Debug)]
struct RingBuffer<T> {
    data: Vec<T>,
    capacity: usize,
    write_pos: usize,
    total_samples: u64,
}

impl<T: Clone + Ord> RingBuffer<T> {
    fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            write_pos: 0,
            total_samples: 0,
        }
    }

    fn push(&mut self, value: T) {
        if self.data.len() < self.capacity {
            self.data.push(value);
        } else {
            self.data[self.write_pos] = value;
        }
        self.write_pos = (self.write_pos + 1) % self.capacity;
        self.total_samples += 1;
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Percentile in 0.0..=1.0
    fn percentile(&self, p: f64) -> Option<T> {
        if self.data.is_empty() {
            return None;
        }
        let mut sorted = self.data.clone();
        sorted.sort();
        let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        sorted.get(idx).cloned()
    }
}

impl CaptureMetrics {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sessions_started: AtomicU64::new(0),
            sessions_completed: AtomicU64::new(0),
            sessions_failed: AtomicU64::new(0),
            sessions_stopped: AtomicU64::new(0),
            pages_captured: AtomicU64::new(0),
            pages_missing: AtomicU64::new(0),
            capture_retries: AtomicU64::new(0),
            blank_retries: AtomicU64::new(0),
            zoom_restores: AtomicU64::new(0),
            fallback_clicks: AtomicU64::new(0),
            readiness_timeouts: AtomicU64::new(0),
            active_sessions: AtomicU32::new(0),
            page_durations: RwLock::new(RingBuffer::new(MAX_HISTOGRAM_SAMPLES)),
            errors_by_type: RwLock::new(HashMap::new()),
            start_time: RwLock::new(None),
        }
    }

    /// A session started
    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// A session reached a terminal state
    pub fn record_session_finished(&self, outcome: &str) {
        let counter = match outcome {
            "completed" => &self.sessions_completed,
            "stopped" => &self.sessions_stopped,
            _ => &self.sessions_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        // saturating: a finish without a start must not wrap the gauge
        let _ = self
            .active_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// A frame was accepted; `cycle` is the page's navigate-to-accept time
    pub fn record_page_captured(&self, cycle: Duration) {
        self.pages_captured.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut durations) = self.page_durations.write() {
            durations.push(cycle);
        }
    }

    /// A page produced no frame
    pub fn record_page_missing(&self) {
        self.pages_missing.fetch_add(1, Ordering::Relaxed);
    }

    /// A capture attempt is being retried
    pub fn record_capture_retry(&self) {
        self.capture_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// A blank-suspect frame is being retried
    pub fn record_blank_retry(&self) {
        self.blank_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Zoom was put back after a capture attempt
    pub fn record_zoom_restore(&self) {
        self.zoom_restores.fetch_add(1, Ordering::Relaxed);
    }

    /// A page turn fell back to clicking
    pub fn record_fallback_click(&self) {
        self.fallback_clicks.fetch_add(1, Ordering::Relaxed);
    }

    /// Readiness polling ran out of attempts
    pub fn record_readiness_timeout(&self) {
        self.readiness_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an error by kind
    pub fn record_error(&self, error_type: &str) {
        if let Ok(mut breakdown) = self.errors_by_type.write() {
            *breakdown.entry(error_type.to_string()).or_insert(0) += 1;
        }
    }

    /// Count for one error kind
    pub fn error_count(&self, error_type: &str) -> u64 {
        self.errors_by_type
            .read()
            .ok()
            .and_then(|m| m.get(error_type).copied())
            .unwrap_or(0)
    }

    /// Convert metrics to Prometheus text format
    pub fn to_prometheus_format(&self) -> String {
        let mut output = String::new();
        let counters: [(&str, &AtomicU64); 11] = [
            ("sessions_started_total", &self.sessions_started),
            ("sessions_completed_total", &self.sessions_completed),
            ("sessions_failed_total", &self.sessions_failed),
            ("sessions_stopped_total", &self.sessions_stopped),
            ("pages_captured_total", &self.pages_captured),
            ("pages_missing_total", &self.pages_missing),
            ("capture_retries_total", &self.capture_retries),
            ("blank_retries_total", &self.blank_retries),
            ("zoom_restores_total", &self.zoom_restores),
            ("fallback_clicks_total", &self.fallback_clicks),
            ("readiness_timeouts_total", &self.readiness_timeouts),
        ];
        for (name, value) in counters {
            output.push_str(&format!(
                "pagecast_{} {}\n",
                name,
                value.load(Ordering::Relaxed)
            ));
        }

        output.push_str(&format!(
            "pagecast_active_sessions {}\n",
            self.active_sessions.load(Ordering::Relaxed)
        ));

        if let Ok(errors) = self.errors_by_type.read() {
            let mut kinds: Vec<_> = errors.iter().collect();
            kinds.sort();
            for (kind, count) in kinds {
                output.push_str(&format!(
                    "pagecast_errors_total{{type=\"{}\"}} {}\n",
                    kind, count
                ));
            }
        }

        if let Ok(durations) = self.page_durations.read() {
            if !durations.is_empty() {
                for (label, p) in [("p50", 0.5), ("p95", 0.95)] {
                    if let Some(d) = durations.percentile(p) {
                        output.push_str(&format!(
                            "pagecast_page_cycle_{}_ms {}\n",
                            label,
                            d.as_millis()
                        ));
                    }
                }
                output.push_str(&format!(
                    "pagecast_page_cycle_samples {}\n",
                    durations.total_samples
                ));
            }
        }

        if let Ok(start) = self.start_time.read() {
            if let Some(start) = *start {
                output.push_str(&format!(
                    "pagecast_uptime_seconds {}\n",
                    start.elapsed().as_secs()
                ));
            }
        }

        output
    }
}

impl Default for CaptureMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
pub static METRICS: OnceLock<CaptureMetrics> = OnceLock::new();

/// Get or initialize the global metrics instance
pub fn global_metrics() -> &'static CaptureMetrics {
    METRICS.get_or_init(CaptureMetrics::new)
}

/// Initialize global metrics and stamp the start time (call once at startup)
pub fn init() {
    if let Ok(mut start_time) = global_metrics().start_time.write() {
        *start_time = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_counters() {
        let metrics = CaptureMetrics::new();
        metrics.record_session_started();
        assert_eq!(metrics.active_sessions.load(Ordering::Relaxed), 1);

        metrics.record_session_finished("stopped");
        assert_eq!(metrics.sessions_stopped.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.active_sessions.load(Ordering::Relaxed), 0);

        metrics.record_session_finished("failed");
        assert_eq!(metrics.active_sessions.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.sessions_failed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_prometheus_output() {
        let metrics = CaptureMetrics::new();
        metrics.record_page_captured(Duration::from_millis(100));
        metrics.record_page_captured(Duration::from_millis(300));
        metrics.record_error("surface_closed");

        let output = metrics.to_prometheus_format();
        assert!(output.contains("pagecast_pages_captured_total 2\n"));
        assert!(output.contains("pagecast_errors_total{type=\"surface_closed\"} 1\n"));
        assert!(output.contains("pagecast_page_cycle_p50_ms"));
        assert_eq!(metrics.error_count("surface_closed"), 1);
    }

    #[test]
    fn test_ring_buffer_wraps() {
        let mut buffer = RingBuffer::new(3);
        for v in [5, 1, 4, 2] {
            buffer.push(v);
        }
        assert_eq!(buffer.total_samples, 4);
        assert_eq!(buffer.percentile(0.0), Some(1));
        assert_eq!(buffer.percentile(1.0), Some(4));
    }

    #[test]
    fn test_global_metrics() {
        init();
        global_metrics().record_fallback_click();
        assert!(global_metrics().fallback_clicks.load(Ordering::Relaxed) >= 1);
    }
}
