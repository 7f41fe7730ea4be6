//! Ingress service configuration.

use fr0g_core::config::{HttpConfig, RegistryClientConfig, SecurityConfig};
use fr0g_core::error::PlatformError;
use serde::{Deserialize, Serialize};

fn default_enqueue_timeout_ms() -> u64 {
    1_000
}

fn default_forward_buffer() -> usize {
    256
}

/// How adapters reach the event router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterTarget {
    /// Static endpoint override, e.g. `http://127.0.0.1:9102`. When unset,
    /// the router is resolved through the registry by `service_name`.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Logical name the router registers under.
    #[serde(default = "RouterTarget::default_service_name")]
    pub service_name: String,
    /// Bound on the in-process buffer between adapters and the forwarder.
    #[serde(default = "default_forward_buffer")]
    pub buffer: usize,
    /// How long an adapter may wait to hand an event to the forwarder, in
    /// milliseconds. Past this the adapter answers busy (HTTP 429).
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,
}

impl RouterTarget {
    fn default_service_name() -> String {
        "fr0g-router".to_string()
    }
}

impl Default for RouterTarget {
    fn default() -> Self {
        Self {
            endpoint: None,
            service_name: Self::default_service_name(),
            buffer: default_forward_buffer(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
        }
    }
}

/// One HTTP webhook adapter (SMS, voice, Discord, generic).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookAdapterConfig {
    /// Whether the adapter runs.
    #[serde(default)]
    pub enabled: bool,
    /// Listener port; 0 binds an ephemeral port.
    #[serde(default)]
    pub port: u16,
    /// Shared secret for HMAC-SHA256 body signing. Unset disables
    /// verification.
    #[serde(default)]
    pub signing_secret: Option<String>,
}

fn default_irc_nickname() -> String {
    "fr0g".to_string()
}

fn default_reconnect_base() -> u64 {
    2
}

/// IRC client adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrcAdapterConfig {
    /// Whether the adapter runs.
    #[serde(default)]
    pub enabled: bool,
    /// Servers as `host:port`.
    #[serde(default)]
    pub servers: Vec<String>,
    /// Nickname to register with.
    #[serde(default = "default_irc_nickname")]
    pub nickname: String,
    /// Channels to join after registration.
    #[serde(default)]
    pub channels: Vec<String>,
    /// First reconnect delay in seconds; doubles up to five minutes.
    #[serde(default = "default_reconnect_base")]
    pub reconnect_base: u64,
}

impl Default for IrcAdapterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            servers: Vec::new(),
            nickname: default_irc_nickname(),
            channels: Vec::new(),
            reconnect_base: default_reconnect_base(),
        }
    }
}

fn default_esmtp_port() -> u16 {
    2525
}

fn default_max_connections() -> usize {
    64
}

fn default_max_message_size() -> usize {
    10 * 1024 * 1024
}

/// ESMTP listener adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EsmtpAdapterConfig {
    /// Whether the adapter runs.
    #[serde(default)]
    pub enabled: bool,
    /// Listener port.
    #[serde(default = "default_esmtp_port")]
    pub port: u16,
    /// Concurrent connection bound.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Maximum accepted DATA size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// PEM certificate enabling STARTTLS.
    #[serde(default)]
    pub tls_cert: Option<String>,
    /// PEM key enabling STARTTLS.
    #[serde(default)]
    pub tls_key: Option<String>,
}

impl Default for EsmtpAdapterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_esmtp_port(),
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
            tls_cert: None,
            tls_key: None,
        }
    }
}

/// The per-channel adapter blocks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterBlocks {
    /// SMS webhook adapter.
    #[serde(default)]
    pub sms: WebhookAdapterConfig,
    /// Voice transcript webhook adapter.
    #[serde(default)]
    pub voice: WebhookAdapterConfig,
    /// Discord webhook adapter.
    #[serde(default)]
    pub discord: WebhookAdapterConfig,
    /// Generic JSON webhook adapter.
    #[serde(default)]
    pub webhook: WebhookAdapterConfig,
    /// IRC client adapter.
    #[serde(default)]
    pub irc: IrcAdapterConfig,
    /// ESMTP listener adapter.
    #[serde(default)]
    pub esmtp: EsmtpAdapterConfig,
}

fn default_http() -> HttpConfig {
    HttpConfig {
        port: 8510,
        ..HttpConfig::default()
    }
}

/// Full configuration of the ingress process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngressConfig {
    /// Operational HTTP listener.
    #[serde(default = "default_http")]
    pub http: HttpConfig,
    /// Security settings for the HTTP surfaces.
    #[serde(default)]
    pub security: SecurityConfig,
    /// Registry client settings.
    #[serde(default)]
    pub registry: RegistryClientConfig,
    /// Router resolution and forwarding bounds.
    #[serde(default)]
    pub router: RouterTarget,
    /// Per-channel adapters.
    #[serde(default)]
    pub adapters: AdapterBlocks,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            http: default_http(),
            security: SecurityConfig::default(),
            registry: RegistryClientConfig::default(),
            router: RouterTarget::default(),
            adapters: AdapterBlocks::default(),
        }
    }
}

impl IngressConfig {
    /// Validate the whole configuration; errors abort startup.
    pub fn validate(&self) -> Result<(), PlatformError> {
        self.http.validate()?;
        self.security.validate()?;
        if self.router.buffer == 0 {
            return Err(PlatformError::Config(
                "router.buffer must be positive".to_string(),
            ));
        }
        if self.router.enqueue_timeout_ms == 0 {
            return Err(PlatformError::Config(
                "router.enqueue_timeout_ms must be positive".to_string(),
            ));
        }
        if self.adapters.irc.enabled && self.adapters.irc.servers.is_empty() {
            return Err(PlatformError::Config(
                "irc adapter enabled without servers".to_string(),
            ));
        }
        if self.adapters.esmtp.enabled {
            if self.adapters.esmtp.max_connections == 0 {
                return Err(PlatformError::Config(
                    "esmtp.max_connections must be positive".to_string(),
                ));
            }
            if self.adapters.esmtp.tls_cert.is_some() != self.adapters.esmtp.tls_key.is_some() {
                return Err(PlatformError::Config(
                    "esmtp STARTTLS requires both tls_cert and tls_key".to_string(),
                ));
            }
        }
        let webhook_ports: Vec<u16> = [
            &self.adapters.sms,
            &self.adapters.voice,
            &self.adapters.discord,
            &self.adapters.webhook,
        ]
        .iter()
        .filter(|a| a.enabled && a.port != 0)
        .map(|a| a.port)
        .collect();
        let mut seen = std::collections::HashSet::new();
        for port in webhook_ports {
            if !seen.insert(port) {
                return Err(PlatformError::Config(format!(
                    "webhook adapters conflict on port {port}"
                )));
            }
        }
        Ok(())
    }
}
