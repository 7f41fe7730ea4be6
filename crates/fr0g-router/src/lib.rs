//! # fr0g-router
//!
//! The event router. Owns the bounded input queue, runs the worker pool
//! that calls the cognitive analyzer with a per-event deadline, synthesizes
//! output commands from returned actions in order, and hands them to the
//! egress pipeline. Failed events requeue with exponential backoff until
//! the retry budget is spent, then dead-letter.

pub mod analyzer;
pub mod config;
pub mod egress_client;
pub mod ops;
pub mod router;
pub mod rpc;

pub use analyzer::AnalyzerBridge;
pub use config::RouterConfig;
pub use egress_client::CommandForwarder;
pub use router::{CommandSink, EventAnalyzer, EventRouter};
