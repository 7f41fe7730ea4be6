//! Registry client: registration, heartbeating, and peer discovery.
//!
//! Every service embeds this client. It registers the service at startup,
//! re-registers on a heartbeat interval (which refreshes `lastSeen` on the
//! registry side), deregisters on shutdown, and resolves peers by logical
//! name. Discovered endpoints are cached, but never trusted for longer than
//! the service TTL; a non-200 discovery answer means "peer unknown, retry
//! with backoff".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Deserialize;

use crate::config::RegistryClientConfig;
use crate::error::PlatformError;
use crate::retry::{retry, RetryConfig};
use crate::shutdown::ShutdownToken;
use crate::types::{HealthStatus, ServiceRecord};

#[derive(Debug, Deserialize)]
struct HealthEntry {
    #[serde(rename = "Service")]
    service: ServiceRecord,
}

struct CacheEntry {
    records: Vec<ServiceRecord>,
    fetched_at: Instant,
}

/// HTTP client for the registry surface, with a TTL-bounded discovery cache.
pub struct RegistryClient {
    http: reqwest::Client,
    config: RegistryClientConfig,
    cache: RwLock<HashMap<String, CacheEntry>>,
}

impl RegistryClient {
    /// Build a client from the shared registry configuration.
    pub fn new(config: RegistryClientConfig) -> Result<Self, PlatformError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PlatformError::Config(format!("registry http client: {e}")))?;
        Ok(Self {
            http,
            config,
            cache: RwLock::new(HashMap::new()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.registry_url.trim_end_matches('/'))
    }

    /// Upsert this service's record. Idempotent on the record id.
    pub async fn register(&self, record: &ServiceRecord) -> Result<(), PlatformError> {
        let response = self
            .http
            .put(self.url("/v1/agent/service/register"))
            .json(record)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PlatformError::Transient(format!(
                "register returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Register with the shared backoff, for use at startup.
    pub async fn register_with_retry(
        &self,
        record: &ServiceRecord,
        schedule: &RetryConfig,
    ) -> Result<(), PlatformError> {
        retry("registry.register", schedule, || self.register(record)).await
    }

    /// Remove this service's record. Succeeds even when already absent.
    pub async fn deregister(&self, id: &str) -> Result<(), PlatformError> {
        let response = self
            .http
            .put(self.url(&format!("/v1/agent/service/deregister/{id}")))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PlatformError::Transient(format!(
                "deregister returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Push a health status for this service's check.
    pub async fn update_health(
        &self,
        id: &str,
        status: HealthStatus,
    ) -> Result<(), PlatformError> {
        let response = self
            .http
            .put(self.url(&format!("/v1/agent/check/update/{id}")))
            .json(&serde_json::json!({ "Status": status }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PlatformError::Transient(format!(
                "health update returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// All passing instances of a logical service name.
    ///
    /// Served from the cache while it is younger than the service TTL.
    pub async fn discover(&self, name: &str) -> Result<Vec<ServiceRecord>, PlatformError> {
        let ttl = self.config.service_ttl();
        if let Some(entry) = self.cache.read().get(name) {
            if entry.fetched_at.elapsed() < ttl {
                return Ok(entry.records.clone());
            }
        }

        let response = self
            .http
            .get(self.url(&format!("/v1/health/service/{name}")))
            .query(&[("passing", "true")])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PlatformError::Transient(format!(
                "peer unknown: discovery for '{name}' returned {}",
                response.status()
            )));
        }
        let entries: Vec<HealthEntry> = response
            .json()
            .await
            .map_err(|e| PlatformError::Transient(format!("discovery body: {e}")))?;
        let records: Vec<ServiceRecord> = entries.into_iter().map(|e| e.service).collect();

        self.cache.write().insert(
            name.to_string(),
            CacheEntry {
                records: records.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(records)
    }

    /// One passing instance of a peer, or a transient error when none exist.
    pub async fn resolve(&self, name: &str) -> Result<ServiceRecord, PlatformError> {
        let records = self.discover(name).await?;
        records
            .into_iter()
            .next()
            .ok_or_else(|| PlatformError::Transient(format!("peer unknown: no passing '{name}'")))
    }

    /// Drop any cached discovery results for a name, forcing a re-resolve.
    pub fn invalidate(&self, name: &str) {
        self.cache.write().remove(name);
    }

    /// Run the heartbeat loop: re-register every interval, deregister on
    /// shutdown. Individual failures are logged and retried on the next
    /// tick; the registry forgets us after its TTL anyway.
    pub fn spawn_heartbeat(
        self: &Arc<Self>,
        record: ServiceRecord,
        mut shutdown: ShutdownToken,
    ) -> tokio::task::JoinHandle<()> {
        let client = Arc::clone(self);
        let interval = Duration::from_secs(self.config.heartbeat_interval.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        if let Err(e) = client.deregister(&record.id).await {
                            tracing::warn!(id = %record.id, error = %e, "deregister on shutdown failed");
                        }
                        return;
                    }
                    _ = ticker.tick() => {
                        match client.register(&record).await {
                            Ok(()) => tracing::debug!(id = %record.id, "heartbeat"),
                            Err(e) => tracing::warn!(id = %record.id, error = %e, "heartbeat failed"),
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_join_handles_trailing_slash() {
        let config = RegistryClientConfig {
            registry_url: "http://127.0.0.1:8500/".to_string(),
            ..RegistryClientConfig::default()
        };
        let client = RegistryClient::new(config).unwrap();
        assert_eq!(
            client.url("/v1/agent/service/register"),
            "http://127.0.0.1:8500/v1/agent/service/register"
        );
    }

    #[tokio::test]
    async fn test_discovery_against_unreachable_registry_is_transient() {
        // Nothing listens on this port.
        let config = RegistryClientConfig {
            registry_url: "http://127.0.0.1:1".to_string(),
            ..RegistryClientConfig::default()
        };
        let client = RegistryClient::new(config).unwrap();
        let err = client.discover("fr0g-router").await.unwrap_err();
        assert!(err.is_transient());
    }
}
