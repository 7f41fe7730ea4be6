//! Registry-driven HTTP probing and the TTL cleanup loop.

use std::sync::Arc;
use std::time::Duration;

use fr0g_core::shutdown::ShutdownToken;

use crate::catalog::Catalog;

/// Fires due probes and applies their outcomes.
pub struct Prober {
    catalog: Arc<Catalog>,
    http: reqwest::Client,
}

impl Prober {
    /// Create a prober over the shared catalog.
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            http: reqwest::Client::new(),
        }
    }

    /// Wake every second, snapshot due probes, and run them concurrently.
    /// No catalog lock is held while a probe is in flight.
    pub async fn run(self, mut shutdown: ShutdownToken) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    for probe in self.catalog.due_probes() {
                        let catalog = Arc::clone(&self.catalog);
                        let http = self.http.clone();
                        tokio::spawn(async move {
                            let healthy = match http
                                .get(&probe.url)
                                .timeout(probe.timeout)
                                .send()
                                .await
                            {
                                Ok(response) => response.status().is_success(),
                                Err(e) => {
                                    tracing::debug!(id = %probe.id, error = %e, "probe failed");
                                    false
                                }
                            };
                            catalog.record_probe(&probe.id, healthy);
                        });
                    }
                }
            }
        }
    }
}

/// Periodically demote stale records and evict expired ones.
pub async fn run_cleanup(
    catalog: Arc<Catalog>,
    interval: Duration,
    mut shutdown: ShutdownToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                let removed = catalog.sweep();
                if !removed.is_empty() {
                    tracing::info!(count = removed.len(), "cleanup removed expired records");
                }
            }
        }
    }
}
