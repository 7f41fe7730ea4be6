//! Configuration blocks and the layered loader.
//!
//! Every service loads its configuration the same way: built-in defaults,
//! overridden by a YAML file named on the command line, overridden by
//! environment variables prefixed `FR0G_` (with `__` separating path
//! segments, e.g. `FR0G_HTTP__PORT=8080`). Unknown YAML keys produce a
//! startup warning; invalid values abort startup.

use std::collections::HashMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::error::PlatformError;
use crate::retry::RetryConfig;

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "FR0G_";

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_http_timeout() -> u64 {
    10
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Bind host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port.
    #[serde(default = "default_http_port")]
    pub port: u16,
    /// Read timeout in seconds.
    #[serde(default = "default_http_timeout")]
    pub read_timeout: u64,
    /// Write timeout in seconds.
    #[serde(default = "default_http_timeout")]
    pub write_timeout: u64,
    /// Serve TLS on this listener.
    #[serde(default)]
    pub enable_tls: bool,
    /// PEM certificate path, required when TLS is enabled.
    #[serde(default)]
    pub cert_file: Option<String>,
    /// PEM key path, required when TLS is enabled.
    #[serde(default)]
    pub key_file: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_http_port(),
            read_timeout: default_http_timeout(),
            write_timeout: default_http_timeout(),
            enable_tls: false,
            cert_file: None,
            key_file: None,
        }
    }
}

impl HttpConfig {
    /// Socket address string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reject inconsistent TLS settings.
    pub fn validate(&self) -> Result<(), PlatformError> {
        if self.enable_tls && (self.cert_file.is_none() || self.key_file.is_none()) {
            return Err(PlatformError::Config(
                "enable_tls requires cert_file and key_file".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_rpc_port() -> u16 {
    9090
}

/// RPC listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Bind host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port.
    #[serde(default = "default_rpc_port")]
    pub port: u16,
    /// Register the gRPC reflection service. Off in production.
    #[serde(default)]
    pub enable_reflection: bool,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_rpc_port(),
            enable_reflection: false,
        }
    }
}

impl RpcConfig {
    /// Socket address string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Backing store kind for services that persist anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// In-process memory; lost on restart.
    Memory,
    /// Directory of files.
    File,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Store kind.
    #[serde(rename = "type", default = "StorageConfig::default_kind")]
    pub kind: StorageKind,
    /// Data directory, required for the `file` kind.
    #[serde(default)]
    pub data_dir: Option<String>,
}

impl StorageConfig {
    fn default_kind() -> StorageKind {
        StorageKind::Memory
    }

    /// Reject a file store without a directory.
    pub fn validate(&self) -> Result<(), PlatformError> {
        if self.kind == StorageKind::File && self.data_dir.is_none() {
            return Err(PlatformError::Config(
                "storage type 'file' requires data_dir".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::Memory,
            data_dir: None,
        }
    }
}

fn default_rate_limit_rpm() -> u32 {
    600
}

/// Security settings for user-facing HTTP surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Require an API key on requests.
    #[serde(default)]
    pub enable_auth: bool,
    /// The accepted API key.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Emit CORS headers and answer preflight.
    #[serde(default)]
    pub enable_cors: bool,
    /// Allowed origins; `*` when empty and CORS is enabled.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// Per-client requests per minute; 0 disables limiting.
    #[serde(default = "default_rate_limit_rpm")]
    pub rate_limit_rpm: u32,
    /// Reject requests without a key even on read-only endpoints.
    #[serde(default)]
    pub require_api_key: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_auth: false,
            api_key: None,
            enable_cors: false,
            allowed_origins: Vec::new(),
            rate_limit_rpm: default_rate_limit_rpm(),
            require_api_key: false,
        }
    }
}

impl SecurityConfig {
    /// Reject auth without a key.
    pub fn validate(&self) -> Result<(), PlatformError> {
        if (self.enable_auth || self.require_api_key) && self.api_key.is_none() {
            return Err(PlatformError::Config(
                "enable_auth requires api_key".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_registry_url() -> String {
    "http://127.0.0.1:8500".to_string()
}

fn default_heartbeat_interval() -> u64 {
    10
}

fn default_check_interval() -> u64 {
    10
}

fn default_check_timeout() -> u64 {
    5
}

/// Registry client settings embedded by every service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryClientConfig {
    /// Base URL of the registry HTTP surface.
    #[serde(default = "default_registry_url")]
    pub registry_url: String,
    /// Seconds between re-registrations.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    /// Probe interval advertised in the service's check descriptor.
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    /// Probe timeout advertised in the service's check descriptor.
    #[serde(default = "default_check_timeout")]
    pub check_timeout: u64,
    /// Refuse to start when the registry is unreachable.
    #[serde(default)]
    pub strict: bool,
}

impl Default for RegistryClientConfig {
    fn default() -> Self {
        Self {
            registry_url: default_registry_url(),
            heartbeat_interval: default_heartbeat_interval(),
            check_interval: default_check_interval(),
            check_timeout: default_check_timeout(),
            strict: false,
        }
    }
}

impl RegistryClientConfig {
    /// How long a discovered endpoint may be cached before re-resolving.
    pub fn service_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.check_interval * 3)
    }
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_enqueue_timeout_ms() -> u64 {
    1_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

/// Settings for one owned queue and its retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum queued messages.
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
    /// How long an enqueue may wait for capacity, in milliseconds.
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,
    /// Retry budget per message.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl QueueConfig {
    /// The enqueue wait as a [`std::time::Duration`].
    pub fn enqueue_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.enqueue_timeout_ms)
    }

    /// The retry schedule derived from this queue's settings.
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
            ..RetryConfig::default()
        }
    }

    /// Reject degenerate sizes.
    pub fn validate(&self) -> Result<(), PlatformError> {
        if self.capacity == 0 {
            return Err(PlatformError::Config(
                "queue capacity must be positive".to_string(),
            ));
        }
        if self.enqueue_timeout_ms == 0 {
            return Err(PlatformError::Config(
                "enqueue_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(4)
}

/// Worker pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Concurrent workers consuming the owned queue.
    #[serde(default = "default_worker_count")]
    pub count: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
        }
    }
}

impl WorkerConfig {
    /// Reject an empty pool.
    pub fn validate(&self) -> Result<(), PlatformError> {
        if self.count == 0 {
            return Err(PlatformError::Config(
                "worker count must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reject an HTTP and RPC listener sharing an address.
pub fn ensure_distinct_ports(http: &HttpConfig, rpc: &RpcConfig) -> Result<(), PlatformError> {
    if http.port == rpc.port && http.host == rpc.host {
        return Err(PlatformError::Config(format!(
            "http and rpc listeners conflict on {}:{}",
            http.host, http.port
        )));
    }
    Ok(())
}

/// Load a service configuration: defaults, then the YAML file, then
/// `FR0G_*` environment variables.
pub fn load<T>(path: Option<&Path>) -> Result<T, PlatformError>
where
    T: DeserializeOwned + Serialize + Default,
{
    let env: HashMap<String, String> = std::env::vars().collect();
    load_from(path, &env)
}

/// Loader with an explicit environment, for tests.
pub fn load_from<T>(path: Option<&Path>, env: &HashMap<String, String>) -> Result<T, PlatformError>
where
    T: DeserializeOwned + Serialize + Default,
{
    let mut root = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                PlatformError::Config(format!("cannot read {}: {e}", path.display()))
            })?;
            serde_yaml::from_str::<Value>(&raw).map_err(|e| {
                PlatformError::Config(format!("cannot parse {}: {e}", path.display()))
            })?
        }
        None => Value::Mapping(serde_yaml::Mapping::new()),
    };

    // An empty file parses as null; treat it as an empty mapping.
    if matches!(root, Value::Null) {
        root = Value::Mapping(serde_yaml::Mapping::new());
    }
    if !matches!(root, Value::Mapping(_)) {
        return Err(PlatformError::Config(
            "configuration root must be a mapping".to_string(),
        ));
    }

    apply_env_overrides(&mut root, env);

    // Any key the schema does not know is worth a warning before it is
    // silently ignored by deserialization.
    let schema = serde_yaml::to_value(T::default())
        .map_err(|e| PlatformError::Internal(format!("default config not serializable: {e}")))?;
    warn_unknown_keys(&root, &schema, "");

    serde_yaml::from_value(root).map_err(|e| PlatformError::Config(e.to_string()))
}

fn apply_env_overrides(root: &mut Value, env: &HashMap<String, String>) {
    let mut keys: Vec<&String> = env
        .keys()
        .filter(|k| k.starts_with(ENV_PREFIX) && *k != "FR0G_CONFIG")
        .collect();
    keys.sort();

    for key in keys {
        let path: Vec<String> = key[ENV_PREFIX.len()..]
            .split("__")
            .map(|s| s.to_ascii_lowercase())
            .collect();
        if path.iter().any(|segment| segment.is_empty()) {
            continue;
        }
        let value = &env[key];
        let parsed = serde_yaml::from_str::<Value>(value)
            .unwrap_or_else(|_| Value::String(value.clone()));
        insert_path(root, &path, parsed);
    }
}

fn insert_path(node: &mut Value, path: &[String], value: Value) {
    let Value::Mapping(map) = node else {
        return;
    };
    let key = Value::String(path[0].clone());
    if path.len() == 1 {
        map.insert(key, value);
        return;
    }
    let child = map
        .entry(key)
        .or_insert_with(|| Value::Mapping(serde_yaml::Mapping::new()));
    if !matches!(child, Value::Mapping(_)) {
        *child = Value::Mapping(serde_yaml::Mapping::new());
    }
    insert_path(child, &path[1..], value);
}

fn warn_unknown_keys(input: &Value, schema: &Value, path: &str) {
    let (Value::Mapping(input), Value::Mapping(schema)) = (input, schema) else {
        return;
    };
    for (key, value) in input {
        let Some(name) = key.as_str() else { continue };
        let full = if path.is_empty() {
            name.to_string()
        } else {
            format!("{path}.{name}")
        };
        match schema.get(key) {
            Some(expected) => warn_unknown_keys(value, expected, &full),
            None => tracing::warn!(key = %full, "unknown configuration key ignored"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct TestConfig {
        #[serde(default)]
        http: HttpConfig,
        #[serde(default)]
        queue: QueueConfig,
        #[serde(default)]
        security: SecurityConfig,
    }

    #[test]
    fn test_defaults_without_file_or_env() {
        let config: TestConfig = load_from(None, &HashMap::new()).unwrap();
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.queue.capacity, 1024);
        assert!(!config.security.enable_auth);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "http:\n  port: 9000\nqueue:\n  capacity: 16").unwrap();

        let config: TestConfig = load_from(Some(file.path()), &HashMap::new()).unwrap();
        assert_eq!(config.http.port, 9000);
        assert_eq!(config.queue.capacity, 16);
        // Untouched fields keep their defaults.
        assert_eq!(config.queue.max_retries, 3);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "http:\n  port: 9000").unwrap();

        let mut env = HashMap::new();
        env.insert("FR0G_HTTP__PORT".to_string(), "9001".to_string());
        env.insert(
            "FR0G_SECURITY__ENABLE_AUTH".to_string(),
            "true".to_string(),
        );
        env.insert(
            "FR0G_SECURITY__API_KEY".to_string(),
            "secret".to_string(),
        );

        let config: TestConfig = load_from(Some(file.path()), &env).unwrap();
        assert_eq!(config.http.port, 9001);
        assert!(config.security.enable_auth);
        assert_eq!(config.security.api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_invalid_value_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "http:\n  port: not-a-port").unwrap();

        let err = load_from::<TestConfig>(Some(file.path()), &HashMap::new()).unwrap_err();
        assert!(matches!(err, PlatformError::Config(_)));
    }

    #[test]
    fn test_port_conflict_rejected() {
        let http = HttpConfig::default();
        let rpc = RpcConfig {
            port: http.port,
            ..RpcConfig::default()
        };
        assert!(ensure_distinct_ports(&http, &rpc).is_err());

        let rpc = RpcConfig::default();
        assert!(ensure_distinct_ports(&http, &rpc).is_ok());
    }

    #[test]
    fn test_tls_requires_material() {
        let config = HttpConfig {
            enable_tls: true,
            ..HttpConfig::default()
        };
        assert!(config.validate().is_err());

        let config = HttpConfig {
            enable_tls: true,
            cert_file: Some("cert.pem".into()),
            key_file: Some("key.pem".into()),
            ..HttpConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_auth_requires_key() {
        let config = SecurityConfig {
            enable_auth: true,
            ..SecurityConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let queue = QueueConfig {
            capacity: 0,
            ..QueueConfig::default()
        };
        assert!(queue.validate().is_err());

        let workers = WorkerConfig { count: 0 };
        assert!(workers.validate().is_err());
    }
}
