//! Backend pool and aggregate readiness.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::backend::Backend;
use super::health::HealthChecker;
use crate::config::PoolConfig;

/// Owns the ordered backend set, the health checker and the readiness flag
/// the probe listener reads lock-free. The ordering is the configuration
/// order and stays stable for the lifetime of the pool.
pub struct Pool {
    backends: Vec<Arc<Backend>>,
    ready: Arc<AtomicBool>,
    checker: HealthChecker,
}

impl Pool {
    pub fn new(config: &PoolConfig) -> Self {
        let backends = config.backends.iter().map(|b| Arc::new(Backend::new(b))).collect();
        Self {
            backends,
            ready: Arc::new(AtomicBool::new(false)),
            checker: HealthChecker::new(&config.health_checker),
        }
    }

    /// Independent sequence of backend handles, safe to iterate without
    /// holding the pool
    pub fn snapshot(&self) -> Vec<Arc<Backend>> {
        self.backends.clone()
    }

    /// True iff at least one backend is currently healthy
    pub fn is_ready(&self) -> bool {
        self.backends.iter().any(|b| b.is_healthy())
    }

    /// Shared readiness flag, refreshed after every health round
    pub fn readiness(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.ready)
    }

    /// Start the background health checker. The first probe round runs
    /// immediately so readiness converges before the first tick.
    pub fn start(&self) {
        self.checker.start(self.backends.clone(), Arc::clone(&self.ready));
    }

    /// Stop the health checker. Idempotent.
    pub fn stop(&self) {
        self.checker.stop();
    }

    /// Publish the computed readiness into the shared flag
    pub fn refresh_readiness(&self) {
        self.ready.store(self.is_ready(), Ordering::SeqCst);
    }
}
