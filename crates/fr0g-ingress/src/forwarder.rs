//! Hand-off from adapters to the event router.
//!
//! Adapters push onto a bounded in-process buffer and never wait longer
//! than the configured enqueue timeout; a single forwarder task drains the
//! buffer and submits events over the router's `EventService` RPC,
//! resolving the router through the registry and retrying transient
//! failures with the shared backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use fr0g_core::error::PlatformError;
use fr0g_core::registry::RegistryClient;
use fr0g_core::retry::RetryConfig;
use fr0g_core::shutdown::ShutdownToken;
use fr0g_core::types::InputEvent;
use fr0g_rpc::v1::event_service_client::EventServiceClient;
use fr0g_rpc::{status_to_error, v1};

use crate::config::RouterTarget;

/// Where adapters hand their events. Implemented by the forwarder and by
/// test collectors.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Accept one event, waiting at most the configured enqueue timeout.
    async fn submit(&self, event: InputEvent) -> Result<(), PlatformError>;
}

/// The adapter-facing side of the hand-off.
pub struct EventForwarder {
    tx: mpsc::Sender<InputEvent>,
    timeout: Duration,
}

#[async_trait]
impl EventSink for EventForwarder {
    async fn submit(&self, event: InputEvent) -> Result<(), PlatformError> {
        self.tx
            .send_timeout(event, self.timeout)
            .await
            .map_err(|_| PlatformError::QueueFull)
    }
}

/// Start the forwarder. Returns the adapter-facing sink and the drain task.
pub fn spawn(
    registry: Arc<RegistryClient>,
    target: RouterTarget,
    shutdown: ShutdownToken,
) -> (Arc<EventForwarder>, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(target.buffer);
    let forwarder = Arc::new(EventForwarder {
        tx,
        timeout: Duration::from_millis(target.enqueue_timeout_ms),
    });
    let task = ForwarderTask {
        rx,
        registry,
        target,
        retry: RetryConfig::default(),
        client: None,
    };
    let handle = tokio::spawn(task.run(shutdown));
    (forwarder, handle)
}

struct ForwarderTask {
    rx: mpsc::Receiver<InputEvent>,
    registry: Arc<RegistryClient>,
    target: RouterTarget,
    retry: RetryConfig,
    client: Option<EventServiceClient<tonic::transport::Channel>>,
}

impl ForwarderTask {
    async fn run(mut self, mut shutdown: ShutdownToken) {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => return,
                event = self.rx.recv() => match event {
                    Some(event) => event,
                    None => return,
                },
            };

            let id = event.id.clone();
            match self.deliver_with_retry(event).await {
                Ok(()) => tracing::debug!(event = %id, "event forwarded"),
                Err(err) => tracing::error!(event = %id, error = %err, "event lost"),
            }
        }
    }

    async fn deliver_with_retry(&mut self, event: InputEvent) -> Result<(), PlatformError> {
        let mut attempt = 0u32;
        loop {
            match self.deliver(event.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    attempt += 1;
                    tracing::debug!(
                        event = %event.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "router submit failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_transient() => return Err(err.into_permanent()),
                Err(err) => return Err(err),
            }
        }
    }

    async fn endpoint(&self) -> Result<String, PlatformError> {
        if let Some(endpoint) = &self.target.endpoint {
            return Ok(endpoint.clone());
        }
        let record = self.registry.resolve(&self.target.service_name).await?;
        Ok(format!("http://{}", record.endpoint()))
    }

    async fn deliver(&mut self, event: InputEvent) -> Result<(), PlatformError> {
        if self.client.is_none() {
            let endpoint = self.endpoint().await?;
            let client = EventServiceClient::connect(endpoint.clone())
                .await
                .map_err(|e| {
                    PlatformError::NotConnected(format!("router at {endpoint}: {e}"))
                })?;
            self.client = Some(client);
        }

        let client = self
            .client
            .as_mut()
            .ok_or_else(|| PlatformError::NotConnected("router".to_string()))?;
        let request = v1::InputEvent::from(event);
        match client.submit_event(tonic::Request::new(request)).await {
            Ok(response) => {
                let body = response.into_inner();
                if body.accepted {
                    Ok(())
                } else {
                    Err(PlatformError::Transient(body.message))
                }
            }
            Err(status) => {
                // Drop the channel so the next attempt re-resolves the peer.
                self.client = None;
                self.registry.invalidate(&self.target.service_name);
                Err(status_to_error(status))
            }
        }
    }
}
