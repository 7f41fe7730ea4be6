//! Normalized data model shared by every service.
//!
//! Inbound traffic becomes an [`InputEvent`], the analyzer answers with an
//! [`AnalysisResult`] whose actions become [`OutputCommand`]s, and each
//! command terminates with an [`OutputResult`]. The registry catalogs
//! [`ServiceRecord`]s.

mod channel;
mod command;
mod event;
mod service;

pub use channel::ChannelType;
pub use command::{
    OutputAction, OutputCommand, OutputResult, ReviewStatus, Severity, ValidationIssue,
};
pub use event::{AnalysisResult, InputEvent, MAX_PRIORITY};
pub use service::{HealthCheckSpec, HealthStatus, ServiceRecord};
