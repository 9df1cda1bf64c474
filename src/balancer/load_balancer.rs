//! Strategy wrapper with bounded retries and readiness publication.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::backend::Backend;
use super::pool::Pool;
use super::strategy::{self, Strategy};
use crate::config::LoadBalancerConfig;
use crate::error::{RelayError, RelayResult};

pub struct LoadBalancer {
    pool: Arc<Pool>,
    strategy: Box<dyn Strategy>,
    ready: Arc<AtomicBool>,
}

impl LoadBalancer {
    pub fn new(config: &LoadBalancerConfig) -> Self {
        let pool = Arc::new(Pool::new(&config.pool));
        let ready = pool.readiness();
        Self {
            pool,
            strategy: strategy::from_name(&config.lb_type),
            ready,
        }
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Pick the next healthy, non-saturated backend.
    ///
    /// One snapshot is taken and at most one strategy attempt is made per
    /// backend in it; the call never blocks or sleeps. Success publishes
    /// readiness, exhaustion clears it.
    pub fn next(&self) -> RelayResult<Arc<Backend>> {
        let snapshot = self.pool.snapshot();

        for _ in 0..snapshot.len() {
            let Some(candidate) = self.strategy.pick(&snapshot) else {
                break;
            };
            if !candidate.is_healthy() {
                continue;
            }
            if candidate.is_at_capacity() {
                debug!(backend = %candidate.name(), "backend at capacity, skipping");
                continue;
            }
            self.ready.store(true, Ordering::SeqCst);
            return Ok(candidate);
        }

        self.ready.store(false, Ordering::SeqCst);
        Err(RelayError::NoHealthyBackend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, HealthCheckerConfig, PoolConfig};

    fn lb_config(count: usize, max_conns: usize) -> LoadBalancerConfig {
        LoadBalancerConfig {
            lb_type: "round-robin".to_string(),
            pool: PoolConfig {
                backends: (0..count)
                    .map(|i| BackendConfig {
                        name: format!("b{}", i),
                        url: format!("http://127.0.0.1:90{:02}", i),
                        health_url: format!("http://127.0.0.1:90{:02}/health", i),
                        weight: 1,
                        max_conns,
                    })
                    .collect(),
                health_checker: HealthCheckerConfig::default(),
            },
        }
    }

    fn all_healthy(lb: &LoadBalancer) {
        for backend in lb.pool().snapshot() {
            backend.update_health(true);
        }
    }

    #[test]
    fn test_next_with_no_healthy_backend_errors() {
        let lb = LoadBalancer::new(&lb_config(3, 0));
        let result = lb.next();
        assert!(matches!(result, Err(RelayError::NoHealthyBackend)));
        assert!(!lb.is_ready());
    }

    #[test]
    fn test_next_with_empty_pool_errors() {
        let lb = LoadBalancer::new(&lb_config(0, 0));
        assert!(lb.next().is_err());
    }

    #[test]
    fn test_round_robin_window_property() {
        let lb = LoadBalancer::new(&lb_config(3, 0));
        all_healthy(&lb);

        // over N calls each backend is returned exactly once
        let picks: Vec<String> = (0..3).map(|_| lb.next().unwrap().name().to_string()).collect();
        assert_eq!(picks, vec!["b0", "b1", "b2"]);
        assert!(lb.is_ready());
    }

    #[test]
    fn test_unhealthy_backends_skipped() {
        let lb = LoadBalancer::new(&lb_config(3, 0));
        all_healthy(&lb);
        lb.pool().snapshot()[1].update_health(false);

        for _ in 0..6 {
            let backend = lb.next().unwrap();
            assert_ne!(backend.name(), "b1");
        }
    }

    #[test]
    fn test_saturated_backends_skipped() {
        let lb = LoadBalancer::new(&lb_config(2, 1));
        all_healthy(&lb);

        let first = lb.next().unwrap();
        let _guard = first.acquire_connection();

        // the saturated backend is passed over on every subsequent pick
        for _ in 0..4 {
            let backend = lb.next().unwrap();
            assert_ne!(backend.name(), first.name());
        }
    }

    #[test]
    fn test_exhaustion_clears_readiness() {
        let lb = LoadBalancer::new(&lb_config(1, 1));
        all_healthy(&lb);

        let backend = lb.next().unwrap();
        assert!(lb.is_ready());

        let _guard = backend.acquire_connection();
        assert!(lb.next().is_err());
        assert!(!lb.is_ready());
    }
}
