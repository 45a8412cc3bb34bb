//! Periodic backend health checks feeding the store's connection flag.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::store::SessionStore;
use crate::api::Backend;

/// Periodically probes backend health and feeds the result to a store.
///
/// The first check runs immediately. Dropping the monitor stops it.
pub struct HealthMonitor {
    handle: JoinHandle<()>,
}

impl HealthMonitor {
    pub fn spawn(backend: Arc<dyn Backend>, store: Arc<SessionStore>, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let healthy = backend.check_health().await;
                debug!(healthy, "health check");
                store.set_connected(healthy);
            }
        });
        Self { handle }
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
