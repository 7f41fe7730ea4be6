//! Webhook-style HTTP sender for SMS, voice, Discord, and generic targets.

use std::time::Duration;

use async_trait::async_trait;

use fr0g_core::error::PlatformError;
use fr0g_core::types::{ChannelType, OutputCommand};

use crate::config::HttpSenderConfig;

use super::{SendCounters, Sender, SenderStats};

/// POSTs commands as JSON to a provider endpoint.
pub struct HttpSender {
    name: &'static str,
    channel: ChannelType,
    config: HttpSenderConfig,
    http: reqwest::Client,
    counters: SendCounters,
}

impl HttpSender {
    /// Build a sender for one channel.
    pub fn new(name: &'static str, channel: ChannelType, config: HttpSenderConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            name,
            channel,
            config,
            http,
            counters: SendCounters::default(),
        }
    }
}

#[async_trait]
impl Sender for HttpSender {
    fn channel_type(&self) -> ChannelType {
        self.channel
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled && self.config.endpoint.is_some()
    }

    async fn send(&self, command: &OutputCommand) -> Result<(), PlatformError> {
        let endpoint = self.config.endpoint.as_ref().ok_or_else(|| {
            PlatformError::Permanent(format!("{} sender has no endpoint", self.name))
        })?;

        let mut request = self.http.post(endpoint).json(&serde_json::json!({
            "target": command.target,
            "content": command.content,
            "metadata": command.metadata,
        }));
        if let Some(key) = &self.config.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request.send().await.map_err(|e| {
            self.counters.failure();
            PlatformError::from(e)
        })?;

        let status = response.status();
        if status.is_success() {
            self.counters.success();
            tracing::debug!(sender = self.name, command = %command.id, "sent");
            return Ok(());
        }

        self.counters.failure();
        let err = if status.is_server_error() || status.as_u16() == 429 {
            PlatformError::Transient(format!("{} provider returned {status}", self.name))
        } else {
            PlatformError::Permanent(format!("{} provider returned {status}", self.name))
        };
        Err(err)
    }

    fn stats(&self) -> SenderStats {
        self.counters
            .snapshot(self.name, self.channel, self.is_enabled())
    }
}
