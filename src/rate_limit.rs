use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota};
use tracing::debug;

/// Enforces a minimum spacing between successive outbound calls, process-wide.
///
/// Waiting callers are suspended; nothing else is serialized. A zero interval
/// disables throttling.
pub struct RateLimiter {
    limiter: Option<DefaultDirectRateLimiter>,
    min_interval: Duration,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        // with_period keeps the default burst of one, so every call waits a full period.
        let limiter = Quota::with_period(min_interval).map(DefaultDirectRateLimiter::direct);
        Self {
            limiter,
            min_interval,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until this caller may dispatch its request.
    pub async fn acquire(&self) {
        if let Some(limiter) = &self.limiter {
            if limiter.check().is_err() {
                debug!("Rate limiter engaged; waiting for next slot");
                limiter.until_ready().await;
            }
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("min_interval", &self.min_interval)
            .finish()
    }
}
