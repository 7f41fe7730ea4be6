//! RPC client for handing synthesized commands to the egress pipeline.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use fr0g_core::error::PlatformError;
use fr0g_core::registry::RegistryClient;
use fr0g_core::types::OutputCommand;
use fr0g_rpc::v1::command_service_client::CommandServiceClient;
use fr0g_rpc::{status_to_error, v1};

use crate::config::PeerTarget;

/// Lazy client over `CommandService`.
pub struct CommandForwarder {
    registry: Arc<RegistryClient>,
    target: PeerTarget,
    client: Mutex<Option<CommandServiceClient<tonic::transport::Channel>>>,
}

impl CommandForwarder {
    /// Build the forwarder.
    pub fn new(registry: Arc<RegistryClient>, target: PeerTarget) -> Self {
        Self {
            registry,
            target,
            client: Mutex::new(None),
        }
    }

    /// Submit one command. Transient failures (egress down, its queue
    /// full) surface to the caller, which owns the retry policy.
    pub async fn submit(&self, command: OutputCommand) -> Result<(), PlatformError> {
        let deadline = Duration::from_secs(self.target.timeout);
        let mut client = self.connected_client().await?;
        let request = tonic::Request::new(v1::OutputCommand::from(command));

        let response = match tokio::time::timeout(deadline, client.submit_command(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(status)) => {
                self.disconnect().await;
                return Err(status_to_error(status));
            }
            Err(_) => {
                self.disconnect().await;
                return Err(PlatformError::Transient(format!(
                    "egress call exceeded {}s deadline",
                    deadline.as_secs()
                )));
            }
        };

        let body = response.into_inner();
        if body.accepted {
            Ok(())
        } else {
            Err(PlatformError::Transient(body.message))
        }
    }

    async fn connected_client(
        &self,
    ) -> Result<CommandServiceClient<tonic::transport::Channel>, PlatformError> {
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
        let client = CommandServiceClient::connect(endpoint.clone())
            .await
            .map_err(|e| PlatformError::NotConnected(format!("egress at {endpoint}: {e}")))?;
        tracing::info!(endpoint = %endpoint, "egress connected");
        *guard = Some(client.clone());
        Ok(client)
    }

    async fn disconnect(&self) {
        *self.client.lock().await = None;
        self.registry.invalidate(&self.target.service_name);
    }
}
