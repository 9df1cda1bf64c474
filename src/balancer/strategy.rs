//! Backend selection strategies.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::Rng;
use tracing::warn;

use super::backend::Backend;

/// A selection rule over a backend snapshot. Implementations never block
/// or sleep; an empty snapshot yields `None`.
pub trait Strategy: Send + Sync {
    fn pick(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>>;
}

/// Build the strategy named by the configuration. Unknown names fall back
/// to round-robin.
pub fn from_name(name: &str) -> Box<dyn Strategy> {
    match name {
        "round-robin" => Box::new(RoundRobin::new()),
        "least-connections" => Box::new(LeastConnections),
        "random-weight" => Box::new(RandomWeight),
        other => {
            warn!(strategy = other, "unknown load balancer type, using round-robin");
            Box::new(RoundRobin::new())
        }
    }
}

/// Cycles through the snapshot with an atomic cursor
#[derive(Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for RoundRobin {
    fn pick(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        let n = backends.len();
        if n == 0 {
            return None;
        }
        // increment first, then reduce: distinct callers get distinct slots
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % n;
        Some(Arc::clone(&backends[index]))
    }
}

/// Picks the backend with the fewest active connections, ties broken by
/// snapshot order
pub struct LeastConnections;

impl Strategy for LeastConnections {
    fn pick(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        backends.iter().min_by_key(|b| b.active_conns()).cloned()
    }
}

/// Samples `max(1, n/2)` backends uniformly and returns the heaviest
pub struct RandomWeight;

impl Strategy for RandomWeight {
    fn pick(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        let n = backends.len();
        if n == 0 {
            return None;
        }

        let mut rng = rand::thread_rng();
        let samples = (n / 2).max(1);
        let mut selected: Option<&Arc<Backend>> = None;
        for _ in 0..samples {
            let candidate = &backends[rng.gen_range(0..n)];
            if selected.map_or(true, |best| candidate.weight() > best.weight()) {
                selected = Some(candidate);
            }
        }
        selected.cloned()
    }
}
