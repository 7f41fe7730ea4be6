//! Channel senders: the last hop to the external world.
//!
//! One sender per channel kind, looked up from a registry keyed by
//! [`ChannelType`]. Senders perform provider-specific formatting and I/O
//! and map provider errors into the transient/permanent taxonomy; they are
//! stateless apart from in-flight counters and safe to call concurrently.

mod http;
mod irc;
mod smtp;

pub use http::HttpSender;
pub use irc::IrcSender;
pub use smtp::SmtpSender;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use fr0g_core::error::PlatformError;
use fr0g_core::shutdown::ShutdownToken;
use fr0g_core::types::{ChannelType, OutputCommand};

/// Counter snapshot exposed on `/outputs`.
#[derive(Debug, Clone, Serialize)]
pub struct SenderStats {
    /// Sender name.
    pub name: String,
    /// Channel served.
    pub channel: ChannelType,
    /// Whether the sender accepts commands.
    pub enabled: bool,
    /// Successful sends.
    pub sent: u64,
    /// Failed sends.
    pub failed: u64,
}

/// Shared counters each sender updates.
#[derive(Default)]
pub struct SendCounters {
    sent: AtomicU64,
    failed: AtomicU64,
}

impl SendCounters {
    fn success(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    fn failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, name: &str, channel: ChannelType, enabled: bool) -> SenderStats {
        SenderStats {
            name: name.to_string(),
            channel,
            enabled,
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// The outbound half of a channel adapter.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Channel this sender serves.
    fn channel_type(&self) -> ChannelType;

    /// Whether the sender is configured and accepting commands.
    fn is_enabled(&self) -> bool;

    /// Start background machinery (connections). Most senders are
    /// connectionless and keep the default.
    async fn start(&self, shutdown: ShutdownToken) -> Result<(), PlatformError> {
        let _ = shutdown;
        Ok(())
    }

    /// Stop background machinery.
    fn stop(&self) {}

    /// Emit one command onto the channel. Transient errors are retried by
    /// the pipeline's policy; permanent errors terminate the command.
    async fn send(&self, command: &OutputCommand) -> Result<(), PlatformError>;

    /// Counter snapshot.
    fn stats(&self) -> SenderStats;
}

/// Lookup table of enabled senders.
pub struct SenderRegistry {
    senders: HashMap<ChannelType, Arc<dyn Sender>>,
}

impl SenderRegistry {
    /// Build an empty registry.
    pub fn new() -> Self {
        Self {
            senders: HashMap::new(),
        }
    }

    /// Register one sender under its channel.
    pub fn register(&mut self, sender: Arc<dyn Sender>) {
        self.senders.insert(sender.channel_type(), sender);
    }

    /// The sender for a channel, if any is registered.
    pub fn get(&self, channel: ChannelType) -> Option<Arc<dyn Sender>> {
        self.senders.get(&channel).cloned()
    }

    /// All registered senders.
    pub fn all(&self) -> Vec<Arc<dyn Sender>> {
        self.senders.values().cloned().collect()
    }
}

impl Default for SenderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use parking_lot::Mutex;

    use super::*;

    /// Scriptable sender for pipeline tests.
    pub struct FakeSender {
        pub channel: ChannelType,
        pub enabled: bool,
        pub sent: Mutex<Vec<OutputCommand>>,
        pub failures_before_success: AtomicU64,
        pub permanent_failure: bool,
        pub counters: SendCounters,
    }

    impl FakeSender {
        pub fn new(channel: ChannelType) -> Self {
            Self {
                channel,
                enabled: true,
                sent: Mutex::new(Vec::new()),
                failures_before_success: AtomicU64::new(0),
                permanent_failure: false,
                counters: SendCounters::default(),
            }
        }
    }

    #[async_trait]
    impl Sender for FakeSender {
        fn channel_type(&self) -> ChannelType {
            self.channel
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }

        async fn send(&self, command: &OutputCommand) -> Result<(), PlatformError> {
            if self.permanent_failure {
                self.counters.failure();
                return Err(PlatformError::Permanent("provider rejected".into()));
            }
            if self.failures_before_success.load(Ordering::SeqCst) > 0 {
                self.failures_before_success.fetch_sub(1, Ordering::SeqCst);
                self.counters.failure();
                return Err(PlatformError::Transient("provider timeout".into()));
            }
            self.counters.success();
            self.sent.lock().push(command.clone());
            Ok(())
        }

        fn stats(&self) -> SenderStats {
            self.counters.snapshot("fake", self.channel, self.enabled)
        }
    }
}
