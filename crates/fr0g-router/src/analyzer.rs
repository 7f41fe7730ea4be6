//! The analyzer bridge: a thin RPC client over the external cognitive
//! analyzer.
//!
//! Connects lazily, applies a per-call deadline, retries transient
//! statuses with the shared backoff, and reports "not connected"
//! explicitly. The bridge never hides a failure behind a synthetic empty
//! result; on persistent failure the router's queue retry policy takes
//! over.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use fr0g_core::error::PlatformError;
use fr0g_core::registry::RegistryClient;
use fr0g_core::retry::RetryConfig;
use fr0g_core::types::{AnalysisResult, InputEvent};
use fr0g_rpc::v1::analyzer_service_client::AnalyzerServiceClient;
use fr0g_rpc::{status_to_error, v1};

use crate::config::PeerTarget;

/// Counters exposed on `/processors`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BridgeStats {
    /// Completed analyzer calls.
    pub calls: u64,
    /// Calls that failed after in-call retries.
    pub failures: u64,
    /// Whether a connection is currently held.
    pub connected: bool,
}

/// RPC client wrapper for `AnalyzerService`.
pub struct AnalyzerBridge {
    registry: Arc<RegistryClient>,
    target: PeerTarget,
    retry: RetryConfig,
    client: Mutex<Option<AnalyzerServiceClient<tonic::transport::Channel>>>,
    calls: AtomicU64,
    failures: AtomicU64,
}

impl AnalyzerBridge {
    /// Build the bridge. In-call retries are short; the queue-level retry
    /// policy owns the long game.
    pub fn new(registry: Arc<RegistryClient>, target: PeerTarget) -> Self {
        Self {
            registry,
            target,
            retry: RetryConfig {
                max_retries: 2,
                base_delay_ms: 100,
                max_delay_ms: 2_000,
                ..RetryConfig::default()
            },
            client: Mutex::new(None),
            calls: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Submit one event and wait for its analysis, within the per-call
    /// deadline.
    pub async fn analyze(&self, event: &InputEvent) -> Result<AnalysisResult, PlatformError> {
        let deadline = Duration::from_secs(self.target.timeout);
        let mut attempt = 0u32;
        loop {
            match self.call_once(event, deadline).await {
                Ok(result) => {
                    self.calls.fetch_add(1, Ordering::Relaxed);
                    return Ok(result);
                }
                Err(err) if err.is_transient() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    attempt += 1;
                    tracing::debug!(
                        event = %event.id,
                        attempt,
                        error = %err,
                        "analyzer call failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    return Err(err);
                }
            }
        }
    }

    async fn call_once(
        &self,
        event: &InputEvent,
        deadline: Duration,
    ) -> Result<AnalysisResult, PlatformError> {
        let mut client = self.connected_client().await?;
        let request = tonic::Request::new(v1::InputEvent::from(event.clone()));

        let response = match tokio::time::timeout(deadline, client.analyze_event(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(status)) => {
                self.disconnect().await;
                return Err(status_to_error(status));
            }
            Err(_) => {
                self.disconnect().await;
                return Err(PlatformError::Transient(format!(
                    "analyzer call exceeded {}s deadline",
                    deadline.as_secs()
                )));
            }
        };

        AnalysisResult::try_from(response.into_inner())
            .map_err(|e| PlatformError::Permanent(format!("malformed analysis: {e}")))
    }

    async fn connected_client(
        &self,
    ) -> Result<AnalyzerServiceClient<tonic::transport::Channel>, PlatformError> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }

        let endpoint = match &self.target.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => {
                let record = self.registry.resolve(&self.target.service_name).await?;
                format!("http://{}", record.endpoint())
            }
        };
        let client = AnalyzerServiceClient::connect(endpoint.clone())
            .await
            .map_err(|e| {
                PlatformError::NotConnected(format!("analyzer at {endpoint}: {e}"))
            })?;
        tracing::info!(endpoint = %endpoint, "analyzer connected");
        *guard = Some(client.clone());
        Ok(client)
    }

    async fn disconnect(&self) {
        *self.client.lock().await = None;
        self.registry.invalidate(&self.target.service_name);
    }

    /// Counter snapshot.
    pub async fn stats(&self) -> BridgeStats {
        BridgeStats {
            calls: self.calls.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            connected: self.client.lock().await.is_some(),
        }
    }
}
