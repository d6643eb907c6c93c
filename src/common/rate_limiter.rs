//! Rate Limiter implementation using token bucket algorithm
//!
//! Paces provider requests so a long batched download stays under the
//! provider's implicit rate limit.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

/// Configuration for the rate limiter
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Requests allowed per refill interval
    pub max_requests: usize,
    /// Refill interval for tokens
    pub refill_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 1,
            refill_interval: Duration::from_secs(1),
        }
    }
}

impl RateLimiterConfig {
    /// One request every `delay`; a zero delay disables pacing
    pub fn spaced(delay: Duration) -> Self {
        Self {
            max_requests: 1,
            refill_interval: delay,
        }
    }

    pub fn with_rate(mut self, max_requests: usize) -> Self {
        self.max_requests = max_requests.max(1);
        self
    }

    pub fn with_refill_interval(mut self, interval: Duration) -> Self {
        self.refill_interval = interval;
        self
    }
}

/// Rate limiter using token bucket algorithm
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use nse_ohlcv::common::{RateLimiter, RateLimiterConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let limiter = RateLimiter::new(RateLimiterConfig::spaced(Duration::from_millis(10)));
///
///     // Acquire a permit before making a request
///     limiter.acquire().await;
///     // Make API request...
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RateLimiter {
    permits: Arc<Semaphore>,
    max_permits: usize,
    last_refill: Arc<Mutex<Instant>>,
    refill_interval: Duration,
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration
    pub fn new(config: RateLimiterConfig) -> Self {
        let max_permits = config.max_requests.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_permits)),
            max_permits,
            last_refill: Arc::new(Mutex::new(Instant::now())),
            refill_interval: config.refill_interval,
        }
    }

    /// A limiter that never waits
    pub fn unlimited() -> Self {
        Self::new(RateLimiterConfig::spaced(Duration::ZERO))
    }

    /// Acquire a permit to make a request
    ///
    /// Waits until the next refill when the bucket is empty. The permit is
    /// consumed (not returned to the pool).
    pub async fn acquire(&self) {
        if self.refill_interval.is_zero() {
            return;
        }

        loop {
            if self.try_acquire().await {
                return;
            }
            let wait = {
                let last_refill = self.last_refill.lock().await;
                self.refill_interval.saturating_sub(last_refill.elapsed())
            };
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// Try to acquire a permit without blocking
    pub async fn try_acquire(&self) -> bool {
        if self.refill_interval.is_zero() {
            return true;
        }
        self.try_refill().await;
        match self.permits.try_acquire() {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn max_permits(&self) -> usize {
        self.max_permits
    }

    /// Refill permits if the refill interval has elapsed
    async fn try_refill(&self) {
        let mut last_refill = self.last_refill.lock().await;
        let elapsed = last_refill.elapsed();

        if elapsed >= self.refill_interval {
            let current = self.permits.available_permits();
            let to_add = self.max_permits.saturating_sub(current);
            if to_add > 0 {
                self.permits.add_permits(to_add);
            }
            *last_refill = Instant::now();
        }
    }
}
