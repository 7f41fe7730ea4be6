//! Registry catalog entries.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health of a registered service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Heartbeats fresh and probes succeeding.
    Passing,
    /// Degraded but still discoverable.
    Warning,
    /// Failing probes or stale heartbeats; excluded from passing queries.
    Critical,
    /// A check is configured but has never run.
    Unknown,
}

impl HealthStatus {
    fn rank(self) -> u8 {
        match self {
            HealthStatus::Passing => 0,
            HealthStatus::Unknown => 1,
            HealthStatus::Warning => 2,
            HealthStatus::Critical => 3,
        }
    }

    /// The worse of two statuses. Effective health of a record is the worse
    /// of its heartbeat-derived and probe-derived status.
    pub fn worse_of(self, other: HealthStatus) -> HealthStatus {
        if self.rank() >= other.rank() {
            self
        } else {
            other
        }
    }

    /// Whether discovery with `passing=true` includes this status.
    pub fn is_discoverable(self) -> bool {
        matches!(self, HealthStatus::Passing | HealthStatus::Warning)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HealthStatus::Passing => "passing",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
            HealthStatus::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Probe configuration attached to a [`ServiceRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    /// URL the registry polls with GET.
    pub http: String,
    /// Poll interval in seconds.
    pub interval: u64,
    /// Per-probe timeout in seconds.
    pub timeout: u64,
    /// Seconds of critical status after which the record is removed, on top
    /// of the TTL grace. Optional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deregister_critical_after: Option<u64>,
}

/// Identity of one live service instance.
///
/// Created by the service itself at startup; the registry mutates only
/// `health` and `last_seen`, re-registration updates `tags`/`meta`, and the
/// record is destroyed by explicit deregister or TTL expiry.
///
/// `meta` uses a `BTreeMap` so a record's JSON form is stable: serialize,
/// deserialize, serialize yields byte-identical output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Stable caller-assigned id, unique across the registry.
    pub id: String,
    /// Logical name; many instances may share it.
    pub name: String,
    /// Host or IP the service listens on.
    pub address: String,
    /// Port of the service's primary listener.
    pub port: u16,
    /// Free-form labels.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Free-form key/value metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
    /// Effective health.
    pub health: HealthStatus,
    /// Last heartbeat or successful registration.
    #[serde(rename = "lastSeen")]
    pub last_seen: DateTime<Utc>,
    /// Optional probe descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<HealthCheckSpec>,
}

impl ServiceRecord {
    /// Create a record with `passing` health and the current time.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            port,
            tags: Vec::new(),
            meta: BTreeMap::new(),
            health: HealthStatus::Passing,
            last_seen: Utc::now(),
            check: None,
        }
    }

    /// Attach a probe descriptor.
    pub fn with_check(mut self, check: HealthCheckSpec) -> Self {
        self.check = Some(check);
        self
    }

    /// Attach a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Attach a metadata entry.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// `host:port` form of the address.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}
