//! Lazily refilled token bucket.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::RateLimiter;
use crate::config::RateLimiterConfig;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Starts full; each admission costs one token and elapsed time refills
/// the bucket at `refill_rate` tokens per second, clamped to `capacity`.
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(config: &RateLimiterConfig) -> Self {
        let capacity = f64::from(config.capacity);
        Self {
            capacity,
            refill_rate: f64::from(config.refill_rate).max(f64::MIN_POSITIVE),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }
}

impl RateLimiter for TokenBucket {
    fn allow(&self, _key: &str) -> (bool, Duration) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };

        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.last_refill = now;
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            (true, Duration::ZERO)
        } else {
            (false, Duration::from_secs_f64(1.0 / self.refill_rate))
        }
    }
}
