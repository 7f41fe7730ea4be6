//! # fr0g-rpc
//!
//! Wire contracts for the platform's RPC surfaces: the analyzer call, event
//! submission into the router, and command acceptance into the egress
//! pipeline. Conversions between the generated types and the core data
//! model live here, along with the mapping between `tonic::Status` and the
//! platform error taxonomy.

/// Generated types and service stubs for `fr0g.v1`.
pub mod v1 {
    tonic::include_proto!("fr0g.v1");

    /// Descriptor set for the optional gRPC reflection service.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("fr0g_descriptor");
}

use chrono::{DateTime, TimeZone, Utc};
use fr0g_core::error::PlatformError;
use fr0g_core::types::{AnalysisResult, ChannelType, InputEvent, OutputAction, OutputCommand};

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn parse_channel(wire: &str) -> Result<ChannelType, PlatformError> {
    wire.parse()
}

impl From<InputEvent> for v1::InputEvent {
    fn from(event: InputEvent) -> Self {
        Self {
            id: event.id,
            r#type: event.channel.as_str().to_string(),
            source: event.source,
            content: event.content,
            metadata: event.metadata.into_iter().collect(),
            timestamp_ms: to_millis(event.timestamp),
            priority: u32::from(event.priority),
        }
    }
}

impl TryFrom<v1::InputEvent> for InputEvent {
    type Error = PlatformError;

    fn try_from(event: v1::InputEvent) -> Result<Self, Self::Error> {
        Ok(Self {
            id: event.id,
            channel: parse_channel(&event.r#type)?,
            source: event.source,
            content: event.content,
            metadata: event.metadata.into_iter().collect(),
            timestamp: from_millis(event.timestamp_ms),
            priority: event.priority.min(10) as u8,
        })
    }
}

impl From<OutputAction> for v1::OutputAction {
    fn from(action: OutputAction) -> Self {
        Self {
            id: action.id,
            r#type: action.channel.as_str().to_string(),
            target: action.target,
            content: action.content,
            metadata: action.metadata.into_iter().collect(),
            priority: u32::from(action.priority),
        }
    }
}

impl TryFrom<v1::OutputAction> for OutputAction {
    type Error = PlatformError;

    fn try_from(action: v1::OutputAction) -> Result<Self, Self::Error> {
        Ok(Self {
            id: action.id,
            channel: parse_channel(&action.r#type)?,
            target: action.target,
            content: action.content,
            metadata: action.metadata.into_iter().collect(),
            priority: action.priority.min(10) as u8,
        })
    }
}

impl From<AnalysisResult> for v1::AnalysisResult {
    fn from(result: AnalysisResult) -> Self {
        Self {
            event_id: result.event_id,
            processed: result.processed,
            actions: result.actions.into_iter().map(Into::into).collect(),
            metadata: result.metadata.into_iter().collect(),
            processed_at_ms: to_millis(result.processed_at),
        }
    }
}

impl TryFrom<v1::AnalysisResult> for AnalysisResult {
    type Error = PlatformError;

    fn try_from(result: v1::AnalysisResult) -> Result<Self, Self::Error> {
        let actions = result
            .actions
            .into_iter()
            .map(OutputAction::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            event_id: result.event_id,
            processed: result.processed,
            actions,
            metadata: result.metadata.into_iter().collect(),
            processed_at: from_millis(result.processed_at_ms),
        })
    }
}

impl From<OutputCommand> for v1::OutputCommand {
    fn from(command: OutputCommand) -> Self {
        Self {
            id: command.id,
            r#type: command.channel.as_str().to_string(),
            target: command.target,
            content: command.content,
            metadata: command.metadata.into_iter().collect(),
            priority: u32::from(command.priority),
        }
    }
}

impl TryFrom<v1::OutputCommand> for OutputCommand {
    type Error = PlatformError;

    fn try_from(command: v1::OutputCommand) -> Result<Self, Self::Error> {
        let action = OutputAction {
            id: command.id,
            channel: parse_channel(&command.r#type)?,
            target: command.target,
            content: command.content,
            metadata: command.metadata.into_iter().collect(),
            priority: command.priority.min(10) as u8,
        };
        Ok(OutputCommand::from(action))
    }
}

/// Classify a `tonic::Status` into the platform taxonomy.
///
/// `UNAVAILABLE`, `DEADLINE_EXCEEDED`, and `RESOURCE_EXHAUSTED` are the
/// transient statuses; everything else is permanent except
/// `INVALID_ARGUMENT`, which maps back to a validation error.
pub fn status_to_error(status: tonic::Status) -> PlatformError {
    match status.code() {
        tonic::Code::Unavailable
        | tonic::Code::DeadlineExceeded
        | tonic::Code::ResourceExhausted => PlatformError::Transient(status.message().to_string()),
        tonic::Code::InvalidArgument => PlatformError::Validation(status.message().to_string()),
        _ => PlatformError::Permanent(format!("{}: {}", status.code(), status.message())),
    }
}

/// Map a platform error onto the `tonic::Status` a server should answer.
pub fn error_to_status(err: &PlatformError) -> tonic::Status {
    match err {
        PlatformError::Validation(msg) | PlatformError::Config(msg) => {
            tonic::Status::invalid_argument(msg.clone())
        }
        PlatformError::QueueFull => tonic::Status::resource_exhausted("queue full"),
        PlatformError::Transient(msg) | PlatformError::NotConnected(msg) => {
            tonic::Status::unavailable(msg.clone())
        }
        PlatformError::Permanent(msg) => tonic::Status::failed_precondition(msg.clone()),
        PlatformError::Internal(_) | PlatformError::Fatal(_) => {
            tonic::Status::internal("internal error")
        }
    }
}
