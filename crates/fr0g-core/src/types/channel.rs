//! The closed set of channel kinds.

use serde::{Deserialize, Serialize};

use crate::error::PlatformError;

/// Kind of communication channel an event arrived on or a command targets.
///
/// The set is closed: adapter and sender implementations are looked up in
/// registries keyed by this variant, so dispatch is a map lookup rather than
/// inheritance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// Text message via an SMS provider.
    Sms,
    /// Voice call transcript.
    Voice,
    /// Email received over SMTP or sent via a relay.
    Email,
    /// IRC message.
    Irc,
    /// Discord message.
    Discord,
    /// Generic JSON webhook.
    Webhook,
}

impl ChannelType {
    /// All channel kinds, in declaration order.
    pub const ALL: [ChannelType; 6] = [
        ChannelType::Sms,
        ChannelType::Voice,
        ChannelType::Email,
        ChannelType::Irc,
        ChannelType::Discord,
        ChannelType::Webhook,
    ];

    /// The lowercase wire name of the channel.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Sms => "sms",
            ChannelType::Voice => "voice",
            ChannelType::Email => "email",
            ChannelType::Irc => "irc",
            ChannelType::Discord => "discord",
            ChannelType::Webhook => "webhook",
        }
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChannelType {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sms" => Ok(ChannelType::Sms),
            "voice" => Ok(ChannelType::Voice),
            "email" => Ok(ChannelType::Email),
            "irc" => Ok(ChannelType::Irc),
            "discord" => Ok(ChannelType::Discord),
            "webhook" => Ok(ChannelType::Webhook),
            other => Err(PlatformError::Validation(format!(
                "unknown channel type: {other}"
            ))),
        }
    }
}
