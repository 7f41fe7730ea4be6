//! Command dispatch: duplicate suppression, per-key serialization, and the
//! sender hop.
//!
//! At-most-once emission per command id is enforced here: an id present in
//! the in-flight set or the recently-completed cache is dropped with a
//! `duplicate_suppressed` marker. Commands sharing a `serial_key` metadata
//! value are serialized through a per-key mutex; everything else dispatches
//! concurrently.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use serde::Serialize;

use fr0g_core::types::{OutputCommand, OutputResult};

use crate::senders::SenderRegistry;

/// How long a completed command id keeps suppressing duplicates.
const COMPLETED_TTL: Duration = Duration::from_secs(600);

/// What happened to one dispatched command.
pub enum DispatchOutcome {
    /// Terminal result, success or failure.
    Completed(OutputResult),
    /// Transient sender failure; the caller requeues under the retry
    /// policy.
    RetryLater(OutputCommand),
    /// The provider rejected the command permanently; the caller records
    /// the result and dead-letters the envelope.
    FailedPermanently(OutputResult),
}

/// Dispatcher counters for `/status`.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchStats {
    /// Successful sends.
    pub sent: u64,
    /// Terminal failures.
    pub failed: u64,
    /// Duplicates dropped.
    pub suppressed: u64,
}

/// The last pipeline stage before a sender.
pub struct Dispatcher {
    senders: SenderRegistry,
    in_flight: DashSet<String>,
    completed: moka::future::Cache<String, ()>,
    serial_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    sent: AtomicU64,
    failed: AtomicU64,
    suppressed: AtomicU64,
}

impl Dispatcher {
    /// Build the dispatcher over the registered senders.
    pub fn new(senders: SenderRegistry) -> Self {
        Self {
            senders,
            in_flight: DashSet::new(),
            completed: moka::future::Cache::builder()
                .time_to_live(COMPLETED_TTL)
                .max_capacity(100_000)
                .build(),
            serial_locks: DashMap::new(),
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    /// The sender registry, for introspection.
    pub fn senders(&self) -> &SenderRegistry {
        &self.senders
    }

    /// Counter snapshot.
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
        }
    }

    /// Dispatch one command to its channel sender.
    pub async fn dispatch(&self, command: OutputCommand) -> DispatchOutcome {
        // At-most-once per id: recently completed or currently in flight
        // means this one is a duplicate.
        if self.completed.get(&command.id).await.is_some()
            || !self.in_flight.insert(command.id.clone())
        {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            tracing::info!(command = %command.id, "duplicate command suppressed");
            return DispatchOutcome::Completed(
                OutputResult::failure(&command.id, "duplicate command suppressed")
                    .with_metadata("duplicate_suppressed", "true"),
            );
        }

        // Per-target FIFO when the producer asked for it.
        let _serial_guard = match command.metadata.get("serial_key") {
            Some(key) => {
                let lock = self
                    .serial_locks
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                    .clone();
                Some(lock.lock_owned().await)
            }
            None => None,
        };

        // An absent or disabled sender terminates the command without
        // retry; it is a configuration condition, not a provider failure.
        let sender = match self.senders.get(command.channel) {
            Some(sender) if sender.is_enabled() => sender,
            Some(_) => {
                return self
                    .terminal_failure(
                        &command,
                        format!("sender for channel '{}' is disabled", command.channel),
                    )
                    .await
            }
            None => {
                return self
                    .terminal_failure(
                        &command,
                        format!("no sender registered for channel '{}'", command.channel),
                    )
                    .await
            }
        };

        match sender.send(&command).await {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                self.completed.insert(command.id.clone(), ()).await;
                self.in_flight.remove(&command.id);
                DispatchOutcome::Completed(OutputResult::success(&command.id))
            }
            Err(err) if err.is_transient() => {
                self.in_flight.remove(&command.id);
                DispatchOutcome::RetryLater(command)
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.completed.insert(command.id.clone(), ()).await;
                self.in_flight.remove(&command.id);
                DispatchOutcome::FailedPermanently(OutputResult::failure(
                    &command.id,
                    err.to_string(),
                ))
            }
        }
    }

    async fn terminal_failure(
        &self,
        command: &OutputCommand,
        message: String,
    ) -> DispatchOutcome {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.completed.insert(command.id.clone(), ()).await;
        self.in_flight.remove(&command.id);
        DispatchOutcome::Completed(OutputResult::failure(&command.id, message))
    }
}
