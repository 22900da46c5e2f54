//! Minimum-interval pacing between upstream calls

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Waits so that consecutive calls start at least `min_interval` apart.
///
/// The clock is `tokio::time`, so tests can drive it with a paused runtime.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: None,
        }
    }

    /// A limiter that never waits
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait for the next slot, then claim it.
    ///
    /// The slot is claimed before the caller issues its request, so the next
    /// call is paced whether this one succeeds or fails. Returns `false` if
    /// `cancel` fired first; the slot is not claimed in that case.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> bool {
        if let Some(last) = self.last_call {
            let ready_at = last + self.min_interval;
            if ready_at > Instant::now() {
                debug!(
                    wait_ms = (ready_at - Instant::now()).as_millis() as u64,
                    "Rate limit: waiting before next request"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return false,
                    _ = tokio::time::sleep_until(ready_at) => {}
                }
            }
        }

        if cancel.is_cancelled() {
            return false;
        }

        self.last_call = Some(Instant::now());
        true
    }
}
