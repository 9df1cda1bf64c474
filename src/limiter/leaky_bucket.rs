//! Leaky bucket with queue discipline.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::RateLimiter;
use crate::config::RateLimiterConfig;

struct LeakState {
    queued: f64,
    last_leak: Instant,
}

/// Tracks the depth of a virtual queue drained at `leak_rate` requests per
/// second; a request is admitted while the queue has room.
pub struct LeakyBucket {
    capacity: f64,
    leak_rate: f64,
    state: Mutex<LeakState>,
}

impl LeakyBucket {
    pub fn new(config: &RateLimiterConfig) -> Self {
        Self {
            capacity: f64::from(config.capacity),
            // refill_rate doubles as the drain rate for this discipline
            leak_rate: f64::from(config.refill_rate).max(f64::MIN_POSITIVE),
            state: Mutex::new(LeakState {
                queued: 0.0,
                last_leak: Instant::now(),
            }),
        }
    }
}

impl RateLimiter for LeakyBucket {
    fn allow(&self, _key: &str) -> (bool, Duration) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };

        let now = Instant::now();
        let elapsed = now.duration_since(state.last_leak).as_secs_f64();
        state.last_leak = now;
        state.queued = (state.queued - elapsed * self.leak_rate).max(0.0);

        if state.queued < self.capacity {
            state.queued += 1.0;
            (true, Duration::ZERO)
        } else {
            (false, Duration::from_secs_f64(1.0 / self.leak_rate))
        }
    }
}
