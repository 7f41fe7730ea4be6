//! # fr0g-egress
//!
//! The egress pipeline. Accepts output commands over RPC, validates them,
//! parks high-risk ones behind the review gate, enforces at-most-once
//! emission per command id, serializes commands that share a `serial_key`,
//! and dispatches the rest to per-channel senders with the shared retry
//! policy.

pub mod config;
pub mod dispatch;
pub mod ops;
pub mod pipeline;
pub mod review;
pub mod rpc;
pub mod senders;
pub mod validate;

pub use config::EgressConfig;
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use pipeline::EgressPipeline;
pub use review::{requires_review, Decision, ReviewQueue};
pub use senders::{Sender, SenderRegistry};
