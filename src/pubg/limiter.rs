use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Upper bound for a single backoff sleep.
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);
/// Upper bound for a server-requested wait.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(600);
/// Backoff base when no request delay is configured.
const ZERO_DELAY_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Enforces a minimum gap between consecutive requests across all callers.
///
/// The lock is held while waiting, so concurrent callers queue up and leave
/// one `min_delay` apart.
pub struct RateLimiter {
    min_delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_delay: Duration) -> Self {
        RateLimiter {
            min_delay,
            last_request: Mutex::new(None),
        }
    }

    /// Wait for a request slot and claim it.
    pub async fn acquire(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            sleep_until(prev + self.min_delay).await;
        }
        *last = Some(Instant::now());
    }
}

/// Retry budget and exponential backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(request_delay: Duration, max_retries: u32) -> Self {
        RetryPolicy {
            base_delay: request_delay,
            max_retries,
        }
    }

    /// Sleep before retry number `retry` (1-based): base, 2x base, 4x base...
    pub fn backoff(&self, retry: u32) -> Duration {
        let base = if self.base_delay.is_zero() {
            ZERO_DELAY_BACKOFF_BASE
        } else {
            self.base_delay
        };
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        base.saturating_mul(factor).min(MAX_BACKOFF)
    }
}
