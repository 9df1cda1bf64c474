//! Per-upstream record and connection accounting.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::BackendConfig;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Mutable backend state. One lock guards all of it so the at-capacity
/// check and the connection increment stay linearizable.
#[derive(Debug)]
struct BackendState {
    healthy: bool,
    failure_count: u32,
    active_conns: usize,
    total_requests: u64,
    last_check: Instant,
    backoff: Duration,
}

/// A single upstream origin endpoint
#[derive(Debug)]
pub struct Backend {
    name: String,
    url: String,
    health_url: String,
    weight: u32,
    max_conns: usize,
    state: RwLock<BackendState>,
}

impl Backend {
    pub fn new(config: &BackendConfig) -> Self {
        let now = Instant::now();
        Self {
            name: config.name.clone(),
            url: config.url.trim_end_matches('/').to_string(),
            health_url: config.health_url.clone(),
            weight: config.weight,
            max_conns: config.max_conns,
            state: RwLock::new(BackendState {
                healthy: false,
                failure_count: 0,
                active_conns: 0,
                total_requests: 0,
                // backdate so the first probe runs immediately
                last_check: now.checked_sub(Duration::from_secs(2)).unwrap_or(now),
                backoff: INITIAL_BACKOFF,
            }),
        }
    }

    fn state(&self) -> RwLockReadGuard<'_, BackendState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state_mut(&self) -> RwLockWriteGuard<'_, BackendState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn health_url(&self) -> &str {
        &self.health_url
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn is_healthy(&self) -> bool {
        self.state().healthy
    }

    pub fn failure_count(&self) -> u32 {
        self.state().failure_count
    }

    pub fn active_conns(&self) -> usize {
        self.state().active_conns
    }

    pub fn total_requests(&self) -> u64 {
        self.state().total_requests
    }

    pub fn current_backoff(&self) -> Duration {
        self.state().backoff
    }

    /// True iff a connection limit is set and reached
    pub fn is_at_capacity(&self) -> bool {
        if self.max_conns == 0 {
            return false;
        }
        self.state().active_conns >= self.max_conns
    }

    /// True while the backend sits inside its probe backoff window
    pub fn is_backed_off(&self) -> bool {
        let state = self.state();
        backed_off_at(state.last_check, state.backoff, Instant::now())
    }

    /// Record a probe outcome. Success restores the backoff floor without
    /// clearing the historical failure count; failure doubles the backoff
    /// up to the cap.
    pub fn update_health(&self, success: bool) {
        let mut state = self.state_mut();
        state.last_check = Instant::now();

        if success {
            if !state.healthy {
                debug!(backend = %self.name, "backend is healthy");
            }
            state.healthy = true;
            state.backoff = INITIAL_BACKOFF;
        } else {
            state.failure_count += 1;
            if state.healthy {
                warn!(
                    backend = %self.name,
                    failures = state.failure_count,
                    "backend marked unhealthy"
                );
            }
            state.healthy = false;
            state.backoff = (state.backoff * 2).min(MAX_BACKOFF);
        }
    }

    /// Claim a connection slot. The returned guard releases it on drop, so
    /// every exit path of the caller gives the slot back.
    pub fn acquire_connection(self: &Arc<Self>) -> ConnectionGuard {
        {
            let mut state = self.state_mut();
            state.active_conns += 1;
            state.total_requests += 1;
        }
        ConnectionGuard {
            backend: Arc::clone(self),
        }
    }
}

fn backed_off_at(last_check: Instant, backoff: Duration, now: Instant) -> bool {
    now < last_check + backoff
}

/// Releases a backend connection slot when dropped
pub struct ConnectionGuard {
    backend: Arc<Backend>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let mut state = self.backend.state_mut();
        state.active_conns = state.active_conns.saturating_sub(1);
    }
}
