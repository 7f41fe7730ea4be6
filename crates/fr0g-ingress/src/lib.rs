//! # fr0g-ingress
//!
//! Channel ingress adapters. Each adapter owns one channel's receive loop
//! (webhook HTTP listeners, an IRC client, an ESMTP listener), normalizes
//! traffic into input events, and hands them to the event router over its
//! submission RPC. Adapters bound their own intake: a saturated forwarder
//! turns into HTTP 429 / SMTP 451 / dropped-and-counted IRC lines rather
//! than unbounded buffering.

pub mod adapter;
pub mod config;
pub mod esmtp;
pub mod forwarder;
pub mod irc;
pub mod ops;
pub mod webhook;

pub use adapter::{AdapterStats, ChannelAdapter};
pub use config::IngressConfig;
pub use forwarder::{EventForwarder, EventSink};
