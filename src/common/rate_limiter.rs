//! Token bucket rate limiter
//!
//! Throttles calls to the series provider so that provider-side throttling
//! does not surface as spurious per-instrument failures.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

/// Configuration for the rate limiter
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum requests allowed per refill interval
    pub max_requests: usize,
    pub refill_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            refill_interval: Duration::from_secs(1),
        }
    }
}

impl RateLimiterConfig {
    pub fn with_rate(mut self, requests_per_interval: usize) -> Self {
        self.max_requests = requests_per_interval.max(1);
        self
    }

    pub fn with_refill_interval(mut self, interval: Duration) -> Self {
        self.refill_interval = interval;
        self
    }
}

/// Rate limiter using a token bucket. Clones share the same bucket.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    permits: Arc<Semaphore>,
    max_permits: usize,
    last_refill: Arc<Mutex<Instant>>,
    refill_interval: Duration,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_requests)),
            max_permits: config.max_requests,
            last_refill: Arc::new(Mutex::new(Instant::now())),
            refill_interval: config.refill_interval,
        }
    }

    pub fn with_rate(requests_per_second: usize) -> Self {
        Self::new(RateLimiterConfig::default().with_rate(requests_per_second))
    }

    /// Wait until a token is available and consume it
    pub async fn acquire(&self) {
        loop {
            self.try_refill().await;
            match self.permits.try_acquire() {
                Ok(permit) => {
                    permit.forget();
                    return;
                }
                Err(_) => tokio::time::sleep(self.time_to_refill().await).await,
            }
        }
    }

    /// Consume a token if one is available right now
    pub async fn try_acquire(&self) -> bool {
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

    async fn time_to_refill(&self) -> Duration {
        let last_refill = self.last_refill.lock().await;
        self.refill_interval
            .saturating_sub(last_refill.elapsed())
            .max(Duration::from_millis(1))
    }

    async fn try_refill(&self) {
        let mut last_refill = self.last_refill.lock().await;
        if last_refill.elapsed() >= self.refill_interval {
            let current = self.permits.available_permits();
            let to_add = self.max_permits.saturating_sub(current);
            if to_add > 0 {
                self.permits.add_permits(to_add);
            }
            *last_refill = Instant::now();
        }
    }
}
