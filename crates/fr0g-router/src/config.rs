//! Router service configuration.

use fr0g_core::config::{
    ensure_distinct_ports, HttpConfig, QueueConfig, RegistryClientConfig, RpcConfig,
    SecurityConfig, WorkerConfig,
};
use fr0g_core::error::PlatformError;
use serde::{Deserialize, Serialize};

fn default_call_timeout() -> u64 {
    30
}

/// How the router reaches one RPC peer (the analyzer or egress).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerTarget {
    /// Static endpoint override, e.g. `http://127.0.0.1:9103`. When unset,
    /// the peer is resolved through the registry by `service_name`.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Logical name the peer registers under.
    pub service_name: String,
    /// Per-call deadline in seconds.
    #[serde(default = "default_call_timeout")]
    pub timeout: u64,
}

impl PeerTarget {
    fn named(service_name: &str) -> Self {
        Self {
            endpoint: None,
            service_name: service_name.to_string(),
            timeout: default_call_timeout(),
        }
    }
}

fn default_http() -> HttpConfig {
    HttpConfig {
        port: 8520,
        ..HttpConfig::default()
    }
}

fn default_rpc() -> RpcConfig {
    RpcConfig {
        port: 9102,
        ..RpcConfig::default()
    }
}

fn default_analyzer() -> PeerTarget {
    PeerTarget::named("fr0g-analyzer")
}

fn default_egress() -> PeerTarget {
    PeerTarget::named("fr0g-egress")
}

/// Full configuration of the router process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Operational HTTP listener.
    #[serde(default = "default_http")]
    pub http: HttpConfig,
    /// Event submission RPC listener.
    #[serde(default = "default_rpc")]
    pub rpc: RpcConfig,
    /// Security settings for the HTTP surface.
    #[serde(default)]
    pub security: SecurityConfig,
    /// Registry client settings.
    #[serde(default)]
    pub registry: RegistryClientConfig,
    /// Input queue and retry policy.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Worker pool sizing.
    #[serde(default)]
    pub workers: WorkerConfig,
    /// The cognitive analyzer peer.
    #[serde(default = "default_analyzer")]
    pub analyzer: PeerTarget,
    /// The egress pipeline peer.
    #[serde(default = "default_egress")]
    pub egress: PeerTarget,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            http: default_http(),
            rpc: default_rpc(),
            security: SecurityConfig::default(),
            registry: RegistryClientConfig::default(),
            queue: QueueConfig::default(),
            workers: WorkerConfig::default(),
            analyzer: default_analyzer(),
            egress: default_egress(),
        }
    }
}

impl RouterConfig {
    /// Validate the whole configuration; errors abort startup.
    pub fn validate(&self) -> Result<(), PlatformError> {
        self.http.validate()?;
        self.security.validate()?;
        self.queue.validate()?;
        self.workers.validate()?;
        ensure_distinct_ports(&self.http, &self.rpc)?;
        if self.analyzer.timeout == 0 || self.egress.timeout == 0 {
            return Err(PlatformError::Config(
                "peer timeouts must be positive".to_string(),
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
        assert!(RouterConfig::default().validate().is_ok());
    }

    #[test]
    fn test_port_conflict_rejected() {
        let mut config = RouterConfig::default();
        config.rpc.port = config.http.port;
        assert!(config.validate().is_err());
    }
}
