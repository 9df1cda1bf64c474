//! Fixed one-second window over a single global counter.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use super::RateLimiter;
use crate::config::RateLimiterConfig;

/// Counts admissions in the current window; a background tick resets the
/// counter every second. Burstiness at window boundaries is accepted by
/// design; pick the token bucket when fairness matters.
pub struct FixedWindow {
    limit: u32,
    counter: Arc<AtomicU32>,
    last_tick: Arc<Mutex<Instant>>,
    reset_task: JoinHandle<()>,
}

impl FixedWindow {
    pub fn new(config: &RateLimiterConfig) -> Self {
        let counter = Arc::new(AtomicU32::new(0));
        let last_tick = Arc::new(Mutex::new(Instant::now()));

        let reset_task = {
            let counter = Arc::clone(&counter);
            let last_tick = Arc::clone(&last_tick);
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_secs(1));
                // the first tick completes immediately and marks the window start
                tick.tick().await;
                loop {
                    tick.tick().await;
                    if let Ok(mut last) = last_tick.lock() {
                        *last = Instant::now();
                    }
                    counter.store(0, Ordering::SeqCst);
                }
            })
        };

        Self {
            limit: config.limit,
            counter,
            last_tick,
            reset_task,
        }
    }
}

impl RateLimiter for FixedWindow {
    fn allow(&self, _key: &str) -> (bool, Duration) {
        let limit = self.limit;
        let admitted = self
            .counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                (count < limit).then_some(count + 1)
            })
            .is_ok();

        if admitted {
            return (true, Duration::ZERO);
        }

        let window_end = self
            .last_tick
            .lock()
            .map(|last| *last + Duration::from_secs(1))
            .unwrap_or_else(|_| Instant::now());
        (false, window_end.saturating_duration_since(Instant::now()))
    }

    fn stop(&self) {
        self.reset_task.abort();
    }
}
