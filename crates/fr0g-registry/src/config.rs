//! Registry service configuration.

use fr0g_core::config::{HttpConfig, SecurityConfig, StorageConfig, StorageKind};
use fr0g_core::error::PlatformError;
use serde::{Deserialize, Serialize};

fn default_http() -> HttpConfig {
    HttpConfig {
        port: 8500,
        ..HttpConfig::default()
    }
}

fn default_check_interval() -> u64 {
    10
}

fn default_check_timeout() -> u64 {
    5
}

fn default_cleanup_interval() -> u64 {
    5
}

/// Health-tracking knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    /// Fallback probe/heartbeat interval for records without a check
    /// descriptor, in seconds.
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    /// Fallback probe timeout in seconds.
    #[serde(default = "default_check_timeout")]
    pub check_timeout: u64,
    /// Seconds without a heartbeat before a record goes critical.
    /// Defaults to three times the record's check interval.
    #[serde(default)]
    pub service_ttl: Option<u64>,
    /// Seconds a critical record lingers before removal. Defaults to the
    /// effective TTL.
    #[serde(default)]
    pub grace: Option<u64>,
    /// Seconds between cleanup sweeps.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            check_timeout: default_check_timeout(),
            service_ttl: None,
            grace: None,
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

/// Full configuration of the registry process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryServiceConfig {
    /// HTTP listener; the registry's only surface.
    #[serde(default = "default_http")]
    pub http: HttpConfig,
    /// Accepted for compatibility; only the memory store is implemented.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Security settings for the HTTP surface.
    #[serde(default)]
    pub security: SecurityConfig,
    /// Health-tracking knobs.
    #[serde(default)]
    pub health: HealthSettings,
}

impl Default for RegistryServiceConfig {
    fn default() -> Self {
        Self {
            http: default_http(),
            storage: StorageConfig::default(),
            security: SecurityConfig::default(),
            health: HealthSettings::default(),
        }
    }
}

impl RegistryServiceConfig {
    /// Validate the whole configuration; errors abort startup.
    pub fn validate(&self) -> Result<(), PlatformError> {
        self.http.validate()?;
        self.storage.validate()?;
        self.security.validate()?;
        if self.health.check_interval == 0 {
            return Err(PlatformError::Config(
                "health.check_interval must be positive".to_string(),
            ));
        }
        if self.health.cleanup_interval == 0 {
            return Err(PlatformError::Config(
                "health.cleanup_interval must be positive".to_string(),
            ));
        }
        if self.storage.kind == StorageKind::File {
            tracing::warn!("storage type 'file' is not implemented; records are kept in memory");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = RegistryServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.health.check_interval, 10);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = RegistryServiceConfig {
            health: HealthSettings {
                check_interval: 0,
                ..HealthSettings::default()
            },
            ..RegistryServiceConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
