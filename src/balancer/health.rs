//! Background health checking.
//!
//! Every tick the checker probes each backend that is not inside its
//! backoff window, at most `max_concurrent_checks` probes in flight at
//! once, then publishes the pool's aggregate readiness. Probe failures are
//! absorbed into the backend's backoff state and never propagate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::backend::Backend;
use crate::config::HealthCheckerConfig;
use crate::proxy::http_client;

pub struct HealthChecker {
    interval: Duration,
    timeout: Duration,
    max_concurrent_checks: usize,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthChecker {
    pub fn new(config: &HealthCheckerConfig) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            interval: config.get_interval(),
            timeout: config.get_timeout(),
            max_concurrent_checks: config.max_concurrent_checks.max(1),
            stop_tx,
            task: Mutex::new(None),
        }
    }

    /// Spawn the probe loop. The interval's first tick fires immediately,
    /// so an initial round runs on start. Calling `start` twice is a no-op.
    pub fn start(&self, backends: Vec<Arc<Backend>>, ready: Arc<AtomicBool>) {
        let mut task = match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if task.is_some() {
            return;
        }

        let interval = self.interval;
        let timeout = self.timeout;
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_checks));
        let mut stop_rx = self.stop_tx.subscribe();

        *task = Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        run_round(&backends, &semaphore, timeout, &ready).await;
                    }
                    _ = stop_rx.changed() => {
                        debug!("health checker stopped");
                        return;
                    }
                }
            }
        }));
    }

    /// Signal the probe loop to exit. Idempotent.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Probe every backend once, then publish readiness exactly once
pub(crate) async fn run_round(
    backends: &[Arc<Backend>],
    semaphore: &Arc<Semaphore>,
    timeout: Duration,
    ready: &AtomicBool,
) {
    let mut probes = Vec::with_capacity(backends.len());
    for backend in backends {
        let backend = Arc::clone(backend);
        let semaphore = Arc::clone(semaphore);
        probes.push(tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            probe(&backend, timeout).await;
        }));
    }
    for task in probes {
        if let Err(e) = task.await {
            warn!(error = %e, "health probe task failed");
        }
    }

    let any_healthy = backends.iter().any(|b| b.is_healthy());
    ready.store(any_healthy, Ordering::SeqCst);
}

/// Probe one backend, skipping it while backed off. Success is a response
/// with a 2xx status inside the timeout.
async fn probe(backend: &Backend, timeout: Duration) {
    if backend.is_backed_off() {
        return;
    }

    let success = match http_client::get_status(backend.health_url(), timeout).await {
        Ok(status) => status.is_success(),
        Err(e) => {
            debug!(backend = %backend.name(), error = %e, "health probe failed");
            false
        }
    };

    backend.update_health(success);
}
