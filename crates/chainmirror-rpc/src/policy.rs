//! Retry and rate-limit policies applied by every HTTP transport.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_retry::strategy::{jitter, ExponentialBackoff};

// ─── Retry ───────────────────────────────────────────────────────────────────

/// Immediate retries for transient transport failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: usize,
    /// Delay before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Cap on any single delay, in milliseconds.
    pub max_backoff_ms: u64,
    /// Randomise each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Doubling delays starting at `initial_backoff_ms`, capped and bounded.
    pub fn delays(&self) -> Vec<Duration> {
        // The strategy's first delay is 2 * factor, so run it at double scale.
        ExponentialBackoff::from_millis(2)
            .factor(self.initial_backoff_ms.max(1))
            .max_delay(Duration::from_millis(self.max_backoff_ms.saturating_mul(2)))
            .take(self.max_retries)
            .map(|d| d / 2)
            .map(|d| if self.jitter { jitter(d) } else { d })
            .collect()
    }
}

// ─── Rate limiting ───────────────────────────────────────────────────────────

/// Token bucket sizing, in requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub capacity: f64,
    /// Requests replenished per second.
    pub refill_per_sec: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 25.0,
            refill_per_sec: 25.0,
        }
    }
}

struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

/// Async token bucket shared by all callers of one endpoint.
pub struct RateLimiter {
    config: RateLimitConfig,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            bucket: Mutex::new(Bucket {
                tokens: config.capacity,
                refilled_at: Instant::now(),
            }),
            config,
        }
    }

    /// Take one token, or report how long until one is available.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.config.refill_per_sec).min(self.config.capacity);
        bucket.refilled_at = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else if self.config.refill_per_sec <= 0.0 {
            Err(Duration::from_secs(1))
        } else {
            Err(Duration::from_secs_f64((1.0 - bucket.tokens) / self.config.refill_per_sec))
        }
    }

    /// Wait until a token is available.
    pub async fn acquire(&self) {
        while let Err(wait) = self.try_acquire() {
            tracing::debug!(wait_ms = wait.as_millis() as u64, "rate limited, waiting");
            tokio::time::sleep(wait).await;
        }
    }
}
