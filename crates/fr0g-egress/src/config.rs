//! Egress service configuration.

use fr0g_core::config::{
    ensure_distinct_ports, HttpConfig, QueueConfig, RegistryClientConfig, RpcConfig,
    SecurityConfig, WorkerConfig,
};
use fr0g_core::error::PlatformError;
use serde::{Deserialize, Serialize};

fn default_http() -> HttpConfig {
    HttpConfig {
        port: 8530,
        ..HttpConfig::default()
    }
}

fn default_rpc() -> RpcConfig {
    RpcConfig {
        port: 9103,
        ..RpcConfig::default()
    }
}

fn default_review_tick() -> u64 {
    1
}

/// Review gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Seconds a pending command may wait before expiring. Unset means no
    /// deadline.
    #[serde(default)]
    pub deadline_seconds: Option<u64>,
    /// Seconds between deadline sweeps.
    #[serde(default = "default_review_tick")]
    pub tick_seconds: u64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            deadline_seconds: None,
            tick_seconds: default_review_tick(),
        }
    }
}

/// A webhook-style sender (SMS, voice, Discord, generic).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpSenderConfig {
    /// Whether the sender runs.
    #[serde(default)]
    pub enabled: bool,
    /// Provider endpoint receiving the outbound POST.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// API key attached as `X-API-Key`.
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_email_from() -> String {
    "fr0g@localhost".to_string()
}

/// The SMTP relay sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSenderConfig {
    /// Whether the sender runs.
    #[serde(default)]
    pub enabled: bool,
    /// Relay as `host:port`.
    #[serde(default)]
    pub relay: Option<String>,
    /// Envelope sender address.
    #[serde(default = "default_email_from")]
    pub from: String,
}

impl Default for EmailSenderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            relay: None,
            from: default_email_from(),
        }
    }
}

fn default_irc_nickname() -> String {
    "fr0g".to_string()
}

/// The IRC sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrcSenderConfig {
    /// Whether the sender runs.
    #[serde(default)]
    pub enabled: bool,
    /// Server as `host:port`.
    #[serde(default)]
    pub server: Option<String>,
    /// Nickname to register with.
    #[serde(default = "default_irc_nickname")]
    pub nickname: String,
}

impl Default for IrcSenderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server: None,
            nickname: default_irc_nickname(),
        }
    }
}

/// Per-channel sender blocks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SenderBlocks {
    /// SMS provider sender.
    #[serde(default)]
    pub sms: HttpSenderConfig,
    /// Voice provider sender.
    #[serde(default)]
    pub voice: HttpSenderConfig,
    /// Discord sender.
    #[serde(default)]
    pub discord: HttpSenderConfig,
    /// Generic webhook sender.
    #[serde(default)]
    pub webhook: HttpSenderConfig,
    /// SMTP relay sender.
    #[serde(default)]
    pub email: EmailSenderConfig,
    /// IRC sender.
    #[serde(default)]
    pub irc: IrcSenderConfig,
}

/// Full configuration of the egress process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EgressConfig {
    /// Operational HTTP listener, which also carries the review API.
    #[serde(default = "default_http")]
    pub http: HttpConfig,
    /// Command acceptance RPC listener.
    #[serde(default = "default_rpc")]
    pub rpc: RpcConfig,
    /// Security settings for the HTTP surface.
    #[serde(default)]
    pub security: SecurityConfig,
    /// Registry client settings.
    #[serde(default)]
    pub registry: RegistryClientConfig,
    /// Output queue and retry policy.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Worker pool sizing.
    #[serde(default)]
    pub workers: WorkerConfig,
    /// Review gate settings.
    #[serde(default)]
    pub review: ReviewConfig,
    /// Channel senders.
    #[serde(default)]
    pub senders: SenderBlocks,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            http: default_http(),
            rpc: default_rpc(),
            security: SecurityConfig::default(),
            registry: RegistryClientConfig::default(),
            queue: QueueConfig::default(),
            workers: WorkerConfig::default(),
            review: ReviewConfig::default(),
            senders: SenderBlocks::default(),
        }
    }
}

impl EgressConfig {
    /// Validate the whole configuration; errors abort startup.
    pub fn validate(&self) -> Result<(), PlatformError> {
        self.http.validate()?;
        self.security.validate()?;
        self.queue.validate()?;
        self.workers.validate()?;
        ensure_distinct_ports(&self.http, &self.rpc)?;
        if self.review.tick_seconds == 0 {
            return Err(PlatformError::Config(
                "review.tick_seconds must be positive".to_string(),
            ));
        }
        for (name, sender) in [
            ("sms", &self.senders.sms),
            ("voice", &self.senders.voice),
            ("discord", &self.senders.discord),
            ("webhook", &self.senders.webhook),
        ] {
            if sender.enabled && sender.endpoint.is_none() {
                return Err(PlatformError::Config(format!(
                    "senders.{name} enabled without endpoint"
                )));
            }
        }
        if self.senders.email.enabled && self.senders.email.relay.is_none() {
            return Err(PlatformError::Config(
                "senders.email enabled without relay".to_string(),
            ));
        }
        if self.senders.irc.enabled && self.senders.irc.server.is_none() {
            return Err(PlatformError::Config(
                "senders.irc enabled without server".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(EgressConfig::default().validate().is_ok());
    }

    #[test]
    fn test_enabled_sender_needs_endpoint() {
        let mut config = EgressConfig::default();
        config.senders.sms.enabled = true;
        assert!(config.validate().is_err());

        config.senders.sms.endpoint = Some("http://provider.example/send".to_string());
        assert!(config.validate().is_ok());
    }
}
