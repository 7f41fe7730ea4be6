//! Command validation.
//!
//! Every command is checked before review gating and dispatch. Any
//! error-severity issue short-circuits the command to a failed result;
//! warnings ride along in the result metadata without blocking.

use fr0g_core::types::{ChannelType, OutputCommand, Severity, ValidationIssue};

/// Longest SMS body that fits a single segment.
pub const SMS_SINGLE_SEGMENT: usize = 160;

/// Validate one command. The returned list is empty for a clean command.
pub fn validate_command(command: &OutputCommand) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if command.id.is_empty() {
        issues.push(ValidationIssue::error("id", "Command ID is required"));
    }
    if command.target.is_empty() {
        issues.push(ValidationIssue::error("target", "Target is required"));
    }
    if command.content.is_empty() {
        issues.push(ValidationIssue::warning("content", "Content is empty"));
    }

    match command.channel {
        ChannelType::Sms if command.content.chars().count() > SMS_SINGLE_SEGMENT => {
            issues.push(
                ValidationIssue::warning(
                    "content",
                    format!(
                        "SMS content exceeds {SMS_SINGLE_SEGMENT} characters and will be segmented"
                    ),
                )
                .with_suggestion("consider splitting the message"),
            );
        }
        ChannelType::Email if !command.metadata.contains_key("subject") => {
            issues.push(ValidationIssue::warning(
                "metadata.subject",
                "Email subject is missing",
            ));
        }
        _ => {}
    }

    issues
}

/// Whether any issue blocks dispatch.
pub fn has_errors(issues: &[ValidationIssue]) -> bool {
    issues.iter().any(|i| i.severity == Severity::Error)
}

/// The blocking issues' descriptions, joined for an error message.
pub fn error_summary(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .filter(|i| i.severity == Severity::Error)
        .map(|i| i.issue.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}
