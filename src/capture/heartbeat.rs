//! Keep-alive ticker for active sessions
//!
//! The heartbeat runs on its own task, independent of the capture loop's
//! suspension points. It never reads or writes session data.

use super::surface::KeepAlive;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Shortest accepted keep-alive period
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);

/// Handle to a running heartbeat; cancelling or dropping it stops the ticker
pub struct Heartbeat {
    token: CancellationToken,
    handle: Option<JoinHandle<u64>>,
}

impl Heartbeat {
    /// Start ticking every `interval`, touching `target` on each tick
    ///
    /// Periods below [`MIN_HEARTBEAT_INTERVAL`] are raised to it.
    pub fn start(target: Arc<dyn KeepAlive>, interval: Duration) -> Self {
        let interval = interval.max(MIN_HEARTBEAT_INTERVAL);
        let token = CancellationToken::new();
        let child = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval() fires immediately; the session is alive at start anyway
            ticker.tick().await;

            let mut beats = 0u64;
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        beats += 1;
                        if let Err(e) = target.touch().await {
                            warn!("Heartbeat touch failed: {}", e);
                        }
                    }
                }
            }
            debug!(beats, "Heartbeat stopped");
            beats
        });

        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Stop the ticker and return how many beats it sent
    pub async fn stop(mut self) -> u64 {
        self.token.cancel();
        match self.handle.take() {
            Some(handle) => handle.await.unwrap_or(0),
            None => 0,
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Counter(AtomicU32);

    #[async_trait]
    impl KeepAlive for Counter {
        async fn touch(&self) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_ticks_until_stopped() {
        let counter = Arc::new(Counter::default());
        let heartbeat = Heartbeat::start(counter.clone(), Duration::from_secs(20));

        tokio::time::sleep(Duration::from_secs(65)).await;
        let beats = heartbeat.stop().await;

        assert_eq!(beats, 3);
        assert_eq!(counter.0.load(Ordering::SeqCst), 3);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_uses_floor() {
        let counter = Arc::new(Counter::default());
        let heartbeat = Heartbeat::start(counter.clone(), Duration::ZERO);

        tokio::time::sleep(MIN_HEARTBEAT_INTERVAL * 3 + Duration::from_millis(50)).await;
        assert_eq!(heartbeat.stop().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_stops_on_drop() {
        let counter = Arc::new(Counter::default());
        {
            let _heartbeat = Heartbeat::start(counter.clone(), Duration::from_secs(10));
            tokio::time::sleep(Duration::from_secs(15)).await;
        }
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
