//! # fr0g
//!
//! Core distributed runtime for the fr0g threat-interception platform.
//!
//! The platform watches several external communication channels (SMS, voice
//! transcripts, email, IRC, chat webhooks), normalizes their traffic into
//! events, scores each event through a cognitive analyzer, and emits response
//! actions back onto the same channels. This workspace implements the shared
//! runtime: the ingress/egress pipeline and the service registry + discovery
//! fabric.
//!
//! The umbrella crate re-exports the shared library; the services themselves
//! live in their own crates and binaries:
//!
//! - `fr0g-registry` - catalog of live service instances, health tracking,
//!   discovery queries
//! - `fr0g-ingress` - channel adapters producing normalized input events
//! - `fr0g-router` - input queue ownership, analyzer bridge, action fan-out
//! - `fr0g-egress` - command validation, review gating, channel senders

pub use fr0g_core::*;

/// Wire contracts shared by the services.
pub use fr0g_rpc as rpc;
