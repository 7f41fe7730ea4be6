//! Inbound events and analyzer results.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ChannelType, OutputAction};

/// Highest allowed event/command priority.
pub const MAX_PRIORITY: u8 = 10;

/// A single inbound message, normalized from any channel.
///
/// Created by an ingress adapter, consumed exactly once by the router, then
/// either acknowledged and dropped or requeued under the retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputEvent {
    /// Caller-assigned unique id.
    pub id: String,
    /// Channel the event arrived on.
    #[serde(rename = "type")]
    pub channel: ChannelType,
    /// Channel-specific origin, e.g. a phone number or `nick!user@host`.
    pub source: String,
    /// UTF-8 text; for voice, the transcript.
    pub content: String,
    /// Channel-specific key/value pairs a sender needs to reply (IRC
    /// `channel`, Discord `channel_id`, email headers, SMS `from_number`).
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// When the adapter observed the message.
    pub timestamp: DateTime<Utc>,
    /// Priority in `[0, 10]`; higher is dequeued first.
    #[serde(default)]
    pub priority: u8,
}

impl InputEvent {
    /// Create an event with the current timestamp and priority 0.
    pub fn new(
        id: impl Into<String>,
        channel: ChannelType,
        source: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            channel,
            source: source.into(),
            content: content.into(),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
            priority: 0,
        }
    }

    /// Set the priority, clamped to `[0, 10]`.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(MAX_PRIORITY);
        self
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Raise the priority floor without ever lowering an existing priority.
    pub fn raise_priority_floor(&mut self, floor: u8) {
        self.priority = self.priority.max(floor.min(MAX_PRIORITY));
    }
}

/// The analyzer's verdict for one [`InputEvent`].
///
/// An empty `actions` list means "no response".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Id of the event this result answers.
    pub event_id: String,
    /// Whether the analyzer actually processed the event.
    pub processed: bool,
    /// Response actions, in the order they must be emitted.
    #[serde(default)]
    pub actions: Vec<OutputAction>,
    /// Analyzer-specific annotations.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// When the analyzer finished.
    pub processed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_clamped() {
        let event = InputEvent::new("e1", ChannelType::Sms, "+15551234", "hi").with_priority(99);
        assert_eq!(event.priority, MAX_PRIORITY);
    }

    #[test]
    fn test_priority_floor_never_lowers() {
        let mut event =
            InputEvent::new("e1", ChannelType::Irc, "nick!u@h", "hello").with_priority(7);
        event.raise_priority_floor(3);
        assert_eq!(event.priority, 7);
        event.raise_priority_floor(9);
        assert_eq!(event.priority, 9);
    }

    #[test]
    fn test_type_field_name_on_wire() {
        let event = InputEvent::new("e1", ChannelType::Voice, "+15550000", "transcript");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "voice");
        assert!(json.get("channel").is_none());
    }
}
