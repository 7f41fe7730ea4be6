//! The in-memory service catalog.
//!
//! A single `RwLock`-protected map is the only shared mutable state in the
//! registry process. Discovery reads run concurrently; registrations,
//! health updates, probe results, and cleanup sweeps serialize on the write
//! lock. No caller holds the lock across I/O.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use fr0g_core::types::{HealthStatus, ServiceRecord};

use crate::config::HealthSettings;

struct Entry {
    record: ServiceRecord,
    /// Health derived from heartbeats and TTL staleness.
    heartbeat_health: HealthStatus,
    /// Health derived from the most recent probe, once one has run.
    probe_health: Option<HealthStatus>,
    /// When the most recent probe fired.
    last_probe: Option<Instant>,
    /// When the record first went critical, for the removal grace period.
    critical_since: Option<Instant>,
}

impl Entry {
    fn effective_health(&self) -> HealthStatus {
        match self.probe_health {
            Some(probe) => self.heartbeat_health.worse_of(probe),
            // A configured check that has never run reads as unknown.
            None if self.record.check.is_some() => {
                self.heartbeat_health.worse_of(HealthStatus::Unknown)
            }
            None => self.heartbeat_health,
        }
    }

    fn refresh(&mut self) {
        self.record.health = self.effective_health();
        if self.record.health == HealthStatus::Critical {
            self.critical_since.get_or_insert_with(Instant::now);
        } else {
            self.critical_since = None;
        }
    }
}

/// A probe due to fire, snapshotted outside the lock.
#[derive(Debug, Clone)]
pub struct DueProbe {
    /// Record id to apply the result to.
    pub id: String,
    /// URL to GET.
    pub url: String,
    /// Per-probe timeout.
    pub timeout: Duration,
}

/// Counts by health state, for `/status`.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogSummary {
    /// Total registered records.
    pub total: usize,
    /// Records currently `passing`.
    pub passing: usize,
    /// Records currently `warning`.
    pub warning: usize,
    /// Records currently `critical`.
    pub critical: usize,
    /// Records currently `unknown`.
    pub unknown: usize,
}

/// The authoritative catalog of live service instances.
pub struct Catalog {
    entries: RwLock<HashMap<String, Entry>>,
    settings: HealthSettings,
}

impl Catalog {
    /// Create an empty catalog.
    pub fn new(settings: HealthSettings) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            settings,
        }
    }

    /// Upsert a record. Idempotent on `id`: re-registration refreshes
    /// `lastSeen` and replaces tags/meta, but keeps accumulated probe state
    /// so a healthy instance does not flap to `unknown` on heartbeat.
    pub fn register(&self, mut record: ServiceRecord) {
        record.last_seen = Utc::now();
        let mut entries = self.entries.write();
        match entries.get_mut(&record.id) {
            Some(entry) => {
                let probe_config_changed = entry.record.check != record.check;
                entry.record = record;
                entry.heartbeat_health = HealthStatus::Passing;
                if probe_config_changed {
                    entry.probe_health = None;
                    entry.last_probe = None;
                }
                entry.refresh();
            }
            None => {
                let id = record.id.clone();
                let mut entry = Entry {
                    record,
                    heartbeat_health: HealthStatus::Passing,
                    probe_health: None,
                    last_probe: None,
                    critical_since: None,
                };
                entry.refresh();
                tracing::info!(id = %id, name = %entry.record.name, "service registered");
                entries.insert(id, entry);
            }
        }
    }

    /// Remove a record. Idempotent: succeeds even when absent.
    pub fn deregister(&self, id: &str) -> bool {
        let removed = self.entries.write().remove(id).is_some();
        if removed {
            tracing::info!(id, "service deregistered");
        }
        removed
    }

    /// One record by id.
    pub fn get(&self, id: &str) -> Option<ServiceRecord> {
        self.entries.read().get(id).map(|e| e.record.clone())
    }

    /// All records sharing a logical name, optionally filtered to the
    /// discoverable states (`passing`, `warning`).
    pub fn list_by_name(&self, name: &str, passing_only: bool) -> Vec<ServiceRecord> {
        self.entries
            .read()
            .values()
            .filter(|e| e.record.name == name)
            .filter(|e| !passing_only || e.record.health.is_discoverable())
            .map(|e| e.record.clone())
            .collect()
    }

    /// Apply a service-pushed health status. Refreshes `lastSeen`.
    pub fn update_health(&self, id: &str, status: HealthStatus) -> bool {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(id) else {
            return false;
        };
        entry.heartbeat_health = status;
        entry.record.last_seen = Utc::now();
        entry.refresh();
        true
    }

    /// Apply one probe outcome.
    pub fn record_probe(&self, id: &str, healthy: bool) {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(id) else {
            return;
        };
        entry.probe_health = Some(if healthy {
            HealthStatus::Passing
        } else {
            HealthStatus::Critical
        });
        entry.last_probe = Some(Instant::now());
        entry.refresh();
    }

    /// Probes due now, for the probe scheduler. Snapshots under the read
    /// lock; the scheduler performs the I/O with no lock held.
    pub fn due_probes(&self) -> Vec<DueProbe> {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter_map(|entry| {
                let check = entry.record.check.as_ref()?;
                let interval = Duration::from_secs(check.interval.max(1));
                let due = match entry.last_probe {
                    Some(last) => now.duration_since(last) >= interval,
                    None => true,
                };
                due.then(|| DueProbe {
                    id: entry.record.id.clone(),
                    url: check.http.clone(),
                    timeout: Duration::from_secs(check.timeout.max(1)),
                })
            })
            .collect()
    }

    /// Demote stale records to critical and remove the ones whose grace
    /// period has also passed. Returns the removed ids.
    pub fn sweep(&self) -> Vec<String> {
        let now = Utc::now();
        let mut removed = Vec::new();
        let mut entries = self.entries.write();

        for entry in entries.values_mut() {
            let interval = entry
                .record
                .check
                .as_ref()
                .map(|c| c.interval)
                .unwrap_or(self.settings.check_interval);
            let ttl = self.settings.service_ttl.unwrap_or(interval * 3);
            let age = (now - entry.record.last_seen).num_seconds();
            if age > ttl as i64 && entry.heartbeat_health != HealthStatus::Critical {
                tracing::warn!(
                    id = %entry.record.id,
                    age_seconds = age,
                    ttl_seconds = ttl,
                    "heartbeat stale, demoting to critical"
                );
                entry.heartbeat_health = HealthStatus::Critical;
                entry.refresh();
            }
        }

        entries.retain(|id, entry| {
            let interval = entry
                .record
                .check
                .as_ref()
                .map(|c| c.interval)
                .unwrap_or(self.settings.check_interval);
            let ttl = self.settings.service_ttl.unwrap_or(interval * 3);
            let grace = self
                .settings
                .grace
                .or(entry
                    .record
                    .check
                    .as_ref()
                    .and_then(|c| c.deregister_critical_after))
                .unwrap_or(ttl);
            let expired = entry
                .critical_since
                .map(|since| since.elapsed() >= Duration::from_secs(grace))
                .unwrap_or(false);
            if expired {
                removed.push(id.clone());
            }
            !expired
        });

        for id in &removed {
            tracing::warn!(id = %id, "record expired and removed");
        }
        removed
    }

    /// Number of registered records.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Counts by health state.
    pub fn summary(&self) -> CatalogSummary {
        let entries = self.entries.read();
        let mut summary = CatalogSummary {
            total: entries.len(),
            passing: 0,
            warning: 0,
            critical: 0,
            unknown: 0,
        };
        for entry in entries.values() {
            match entry.record.health {
                HealthStatus::Passing => summary.passing += 1,
                HealthStatus::Warning => summary.warning += 1,
                HealthStatus::Critical => summary.critical += 1,
                HealthStatus::Unknown => summary.unknown += 1,
            }
        }
        summary
    }
}
