//! Outbound actions, commands, and their terminal results.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ChannelType;

/// A single outbound instruction as returned by the analyzer.
///
/// "Action" is the term inside an [`super::AnalysisResult`]; once it enters
/// the egress pipeline it becomes an [`OutputCommand`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputAction {
    /// Router-assigned id, `action_<eventId>_<nanos>_<seq>` for actions
    /// derived from an event.
    pub id: String,
    /// Channel the action targets.
    #[serde(rename = "type")]
    pub channel: ChannelType,
    /// Channel-specific destination.
    pub target: String,
    /// Message body.
    pub content: String,
    /// Channel-specific key/value pairs.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Priority in `[0, 10]`, inherited from the originating event.
    #[serde(default)]
    pub priority: u8,
}

/// Review state of a command inside the egress pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    /// Not subject to review.
    None,
    /// Parked in the review queue awaiting a decision.
    Pending,
    /// A reviewer approved dispatch.
    Approved,
    /// A reviewer rejected the command. Terminal.
    Rejected,
    /// The review deadline passed without a decision. Treated as rejection.
    Expired,
}

/// An [`OutputAction`] with the review fields it acquires in egress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputCommand {
    /// Command id; duplicate ids are suppressed at dispatch.
    pub id: String,
    /// Channel the command targets.
    #[serde(rename = "type")]
    pub channel: ChannelType,
    /// Channel-specific destination.
    pub target: String,
    /// Message body.
    pub content: String,
    /// Channel-specific key/value pairs. `serial_key` forces per-key FIFO
    /// dispatch; `external = "true"` forces review.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Priority in `[0, 10]`.
    #[serde(default)]
    pub priority: u8,
    /// Current review state.
    #[serde(default = "ReviewStatus::default_none")]
    pub review_status: ReviewStatus,
    /// Reviewer identity, once decided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    /// When the decision was made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Reviewer comments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_comments: Option<String>,
    /// Whether the review gate flagged this command.
    #[serde(default)]
    pub requires_review: bool,
}

impl ReviewStatus {
    fn default_none() -> Self {
        ReviewStatus::None
    }
}

impl From<OutputAction> for OutputCommand {
    fn from(action: OutputAction) -> Self {
        Self {
            id: action.id,
            channel: action.channel,
            target: action.target,
            content: action.content,
            metadata: action.metadata,
            priority: action.priority,
            review_status: ReviewStatus::None,
            reviewed_by: None,
            reviewed_at: None,
            review_comments: None,
            requires_review: false,
        }
    }
}

/// Terminal outcome of one command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputResult {
    /// Id of the command this result terminates.
    pub command_id: String,
    /// Whether the command was emitted onto its channel.
    pub success: bool,
    /// Failure description when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Result annotations (validation warnings, `duplicate_suppressed`).
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// When the command reached its terminal state.
    pub completed_at: DateTime<Utc>,
}

impl OutputResult {
    /// A successful terminal result.
    pub fn success(command_id: impl Into<String>) -> Self {
        Self {
            command_id: command_id.into(),
            success: true,
            error_message: None,
            metadata: HashMap::new(),
            completed_at: Utc::now(),
        }
    }

    /// A failed terminal result.
    pub fn failure(command_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            command_id: command_id.into(),
            success: false,
            error_message: Some(message.into()),
            metadata: HashMap::new(),
            completed_at: Utc::now(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Severity of a [`ValidationIssue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Rejects the command before dispatch.
    Error,
    /// Attached to the result metadata; does not block.
    Warning,
    /// Informational only.
    Info,
}

/// One finding from command validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Field the issue concerns.
    pub field: String,
    /// Human-readable description.
    pub issue: String,
    /// Whether the issue blocks dispatch.
    pub severity: Severity,
    /// Optional remediation hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    /// A blocking issue.
    pub fn error(field: impl Into<String>, issue: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            issue: issue.into(),
            severity: Severity::Error,
            suggestion: None,
        }
    }

    /// A non-blocking issue.
    pub fn warning(field: impl Into<String>, issue: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            issue: issue.into(),
            severity: Severity::Warning,
            suggestion: None,
        }
    }

    /// Attach a remediation hint.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_to_command_carries_fields() {
        let mut metadata = HashMap::new();
        metadata.insert("channel_id".to_string(), "42".to_string());
        let action = OutputAction {
            id: "action_e1_1_0".to_string(),
            channel: ChannelType::Discord,
            target: "guild/42".to_string(),
            content: "reply".to_string(),
            metadata,
            priority: 6,
        };

        let command = OutputCommand::from(action);
        assert_eq!(command.id, "action_e1_1_0");
        assert_eq!(command.priority, 6);
        assert_eq!(command.review_status, ReviewStatus::None);
        assert!(!command.requires_review);
        assert_eq!(command.metadata["channel_id"], "42");
    }

    #[test]
    fn test_review_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&ReviewStatus::Pending).unwrap(),
            "\"pending\""
        );
        assert_eq!(
            serde_json::to_string(&ReviewStatus::None).unwrap(),
            "\"none\""
        );
    }

    #[test]
    fn test_result_constructors() {
        let ok = OutputResult::success("c1");
        assert!(ok.success);
        assert!(ok.error_message.is_none());

        let failed = OutputResult::failure("c2", "Target is required");
        assert!(!failed.success);
        assert_eq!(failed.error_message.as_deref(), Some("Target is required"));
    }
}
