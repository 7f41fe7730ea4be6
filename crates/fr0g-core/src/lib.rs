//! # fr0g-core
//!
//! Shared runtime for the fr0g platform services: the normalized data
//! model, bounded priority queues with backpressure, the retry/backoff
//! schedule, layered configuration loading, the platform error taxonomy,
//! graceful shutdown, HTTP plumbing, the operational introspection server,
//! and the registry client every service embeds.

/// Configuration blocks and the layered loader.
pub mod config;

/// Platform error taxonomy and process exit codes.
pub mod error;

/// Shared plumbing for hyper-based HTTP surfaces.
pub mod http;

/// Operational introspection server.
pub mod ops;

/// Bounded priority queues and the dead-letter sink.
pub mod queue;

/// Registry client: registration, heartbeat, discovery.
pub mod registry;

/// Exponential backoff with jitter.
pub mod retry;

/// Graceful shutdown plumbing.
pub mod shutdown;

/// Normalized events, commands, and registry records.
pub mod types;

/// Commonly used imports for platform services.
pub mod prelude {
    pub use crate::config::{
        ensure_distinct_ports, HttpConfig, QueueConfig, RegistryClientConfig, RpcConfig,
        SecurityConfig, StorageConfig, WorkerConfig,
    };
    pub use crate::error::{exit, PlatformError};
    pub use crate::http::security::SecurityLayer;
    pub use crate::ops::{OpsServer, OpsSource};
    pub use crate::queue::{DeadLetters, EnqueueError, PriorityQueue, QueueMessage, QueueStats};
    pub use crate::registry::RegistryClient;
    pub use crate::retry::{retry, RetryConfig};
    pub use crate::shutdown::{ShutdownController, ShutdownToken};
    pub use crate::types::{
        AnalysisResult, ChannelType, HealthCheckSpec, HealthStatus, InputEvent, OutputAction,
        OutputCommand, OutputResult, ReviewStatus, ServiceRecord, Severity, ValidationIssue,
    };
}
