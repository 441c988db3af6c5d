//! Retry policies and blank-frame classification
//!
//! Every polling loop in the orchestrator is driven by a [`RetryPolicy`]. The
//! decision (`should_retry`) and the wait (`delay_for`) are pure functions so
//! they can be exercised without timers.

use std::time::Duration;

/// Bounded retry policy: `(max_attempts, interval, escalation)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Upper bound on attempts, the first one included
    pub max_attempts: u32,
    /// Base wait between attempts
    pub interval: Duration,
    /// Extra wait added per attempt already made
    pub escalation: Duration,
}

impl RetryPolicy {
    /// Fixed-interval policy
    pub const fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            escalation: Duration::ZERO,
        }
    }

    /// Policy whose wait grows linearly with each attempt
    pub const fn escalating(max_attempts: u32, interval: Duration, escalation: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            escalation,
        }
    }

    /// Decide whether another attempt follows attempt number `attempt`
    /// (0-based), given whether that attempt produced the unwanted signal.
    pub fn should_retry(&self, attempt: u32, unwanted: bool) -> bool {
        unwanted && attempt + 1 < self.max_attempts
    }

    /// Wait before the attempt that follows attempt `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.interval + self.escalation * attempt
    }

    /// Whether attempt `attempt` (0-based) is the last one allowed
    pub fn is_last(&self, attempt: u32) -> bool {
        attempt + 1 >= self.max_attempts
    }
}

/// Decides whether a captured frame probably shows an unrendered page
///
/// There is no ground-truth signal for "the page has content", so this is a
/// seam: callers can swap in a pixel-based detector.
pub trait BlankDetector: Send + Sync {
    /// True when the encoded frame looks blank
    fn is_blank_suspect(&self, encoded: &[u8]) -> bool;
}

/// Default size below which an encoded frame is suspect
pub const DEFAULT_BLANK_THRESHOLD_BYTES: usize = 30 * 1024;

/// Uses the encoded payload size as an entropy proxy
///
/// Mostly-white text pages compress well too, so the threshold should stay
/// well under the size of a real sparse page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedSizeHeuristic {
    threshold: usize,
}

impl EncodedSizeHeuristic {
    /// Frames strictly smaller than `threshold` bytes are suspect
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    /// Configured threshold
    pub fn threshold(&self) -> usize {
        self.threshold
    }
}

impl Default for EncodedSizeHeuristic {
    fn default() -> Self {
        Self::new(DEFAULT_BLANK_THRESHOLD_BYTES)
    }
}

impl BlankDetector for EncodedSizeHeuristic {
    fn is_blank_suspect(&self, encoded: &[u8]) -> bool {
        encoded.len() < self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_retry_bounded() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(100));
        assert!(policy.should_retry(0, true));
        assert!(policy.should_retry(1, true));
        assert!(!policy.should_retry(2, true));
        assert!(!policy.should_retry(0, false));
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let policy = RetryPolicy::fixed(1, Duration::from_millis(100));
        assert!(!policy.should_retry(0, true));
        assert!(policy.is_last(0));
    }

    #[test]
    fn test_escalating_delay() {
        let policy = RetryPolicy::escalating(
            4,
            Duration::from_millis(500),
            Duration::from_millis(250),
        );
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(750));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
    }

    #[test]
    fn test_fixed_delay_does_not_grow() {
        let policy = RetryPolicy::fixed(5, Duration::from_millis(300));
        assert_eq!(policy.delay_for(0), policy.delay_for(4));
    }

    #[test]
    fn test_blank_threshold() {
        let detector = EncodedSizeHeuristic::new(30);
        assert!(detector.is_blank_suspect(&[0u8; 10]));
        assert!(!detector.is_blank_suspect(&[0u8; 50]));
        assert!(!detector.is_blank_suspect(&[0u8; 30]));
    }

    #[test]
    fn test_default_threshold() {
        assert_eq!(
            EncodedSizeHeuristic::default().threshold(),
            DEFAULT_BLANK_THRESHOLD_BYTES
        );
    }
}
