//! Per-client admission control.
//!
//! Three interchangeable limiter disciplines share one contract: admit or
//! reject a request for a key, and when rejecting, estimate how long the
//! caller should wait. Accounting is global across keys in this version;
//! the key still flows through `allow` so a keyed implementation can slot
//! in without touching callers.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

mod extractor;
mod fixed_window;
mod leaky_bucket;
mod token_bucket;

pub use extractor::ClientIpExtractor;
pub use fixed_window::FixedWindow;
pub use leaky_bucket::LeakyBucket;
pub use token_bucket::TokenBucket;

use crate::config::RateLimiterConfig;

/// Admission decision for requests from `key`
pub trait RateLimiter: Send + Sync {
    /// Returns whether the request is admitted and, when rejected, a
    /// best-effort estimate of when admission would next be possible.
    /// When admitted the wait is zero.
    fn allow(&self, key: &str) -> (bool, Duration);

    /// Stop any background bookkeeping. Idempotent.
    fn stop(&self) {}
}

/// Build the limiter named by the configuration. Unknown names fall back
/// to the fixed-window limiter.
pub fn from_config(config: &RateLimiterConfig) -> Arc<dyn RateLimiter> {
    match config.limiter_type.as_str() {
        "fixed-window" => Arc::new(FixedWindow::new(config)),
        "token-bucket" => Arc::new(TokenBucket::new(config)),
        "leaky-bucket" => Arc::new(LeakyBucket::new(config)),
        other => {
            warn!(limiter = other, "unknown rate limiter type, using fixed-window");
            Arc::new(FixedWindow::new(config))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimiterConfig;

    #[tokio::test]
    async fn test_unknown_type_falls_back_to_fixed_window() {
        let config = RateLimiterConfig {
            limiter_type: "sliding-log".to_string(),
            limit: 1,
            ..Default::default()
        };
        let limiter = from_config(&config);

        let (admitted, wait) = limiter.allow("10.0.0.1");
        assert!(admitted);
        assert_eq!(wait, Duration::ZERO);

        // second request in the same window rejected: fixed-window behavior
        let (admitted, _) = limiter.allow("10.0.0.1");
        assert!(!admitted);

        limiter.stop();
    }
}
