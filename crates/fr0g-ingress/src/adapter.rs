//! The adapter contract and shared counters.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use fr0g_core::error::PlatformError;
use fr0g_core::shutdown::ShutdownToken;
use fr0g_core::types::ChannelType;

/// Snapshot of one adapter's counters.
#[derive(Debug, Clone, Serialize)]
pub struct AdapterStats {
    /// Adapter name.
    pub name: String,
    /// Channel the adapter feeds.
    pub channel: ChannelType,
    /// Events handed to the forwarder.
    pub events: u64,
    /// Events dropped because the forwarder was saturated.
    pub dropped: u64,
    /// Protocol or transport errors observed.
    pub errors: u64,
    /// When the most recent event was produced.
    pub last_event_at: Option<DateTime<Utc>>,
}

/// Shared counters each adapter updates.
#[derive(Default)]
pub struct StatsCell {
    events: AtomicU64,
    dropped: AtomicU64,
    errors: AtomicU64,
    last_event_at: Mutex<Option<DateTime<Utc>>>,
}

impl StatsCell {
    /// Count one produced event.
    pub fn event(&self) {
        self.events.fetch_add(1, Ordering::Relaxed);
        *self.last_event_at.lock() = Some(Utc::now());
    }

    /// Count one drop under backpressure.
    pub fn dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one error.
    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot with identity attached.
    pub fn snapshot(&self, name: &str, channel: ChannelType) -> AdapterStats {
        AdapterStats {
            name: name.to_string(),
            channel,
            events: self.events.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            last_event_at: *self.last_event_at.lock(),
        }
    }
}

/// One channel adapter: owns the channel-specific receive loop and produces
/// normalized input events.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Adapter name, e.g. `sms-webhook`.
    fn name(&self) -> &'static str;

    /// Channel the adapter feeds.
    fn channel(&self) -> ChannelType;

    /// Start the receive loop. Returns once the adapter is accepting
    /// traffic; the loop itself runs on spawned tasks that observe the
    /// token.
    async fn start(&self, shutdown: ShutdownToken) -> Result<(), PlatformError>;

    /// Stop the adapter's receive loop.
    fn stop(&self);

    /// Counter snapshot.
    fn stats(&self) -> AdapterStats;
}
