//! Minimal SMTP client sender.
//!
//! Speaks just enough of the protocol to hand a message to the configured
//! relay: EHLO, MAIL FROM, RCPT TO, DATA with dot-stuffing, QUIT. Reply
//! classes map onto the error taxonomy the SMTP way: 4xx is transient,
//! 5xx is permanent.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;

use fr0g_core::error::PlatformError;
use fr0g_core::types::{ChannelType, OutputCommand};

use crate::config::EmailSenderConfig;

use super::{SendCounters, Sender, SenderStats};

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Relays commands as email via SMTP.
pub struct SmtpSender {
    config: EmailSenderConfig,
    counters: SendCounters,
}

impl SmtpSender {
    /// Build the sender.
    pub fn new(config: EmailSenderConfig) -> Self {
        Self {
            config,
            counters: SendCounters::default(),
        }
    }

    async fn relay_message(&self, command: &OutputCommand) -> Result<(), PlatformError> {
        let relay = self.config.relay.as_ref().ok_or_else(|| {
            PlatformError::Permanent("email sender has no relay configured".to_string())
        })?;

        let stream = TcpStream::connect(relay)
            .await
            .map_err(|e| PlatformError::Transient(format!("relay {relay}: {e}")))?;
        let mut stream = BufStream::new(stream);

        expect_reply(&mut stream, "220").await?;
        send_line(&mut stream, "EHLO fr0g.local").await?;
        expect_reply(&mut stream, "250").await?;
        send_line(&mut stream, &format!("MAIL FROM:<{}>", self.config.from)).await?;
        expect_reply(&mut stream, "250").await?;
        send_line(&mut stream, &format!("RCPT TO:<{}>", command.target)).await?;
        expect_reply(&mut stream, "250").await?;
        send_line(&mut stream, "DATA").await?;
        expect_reply(&mut stream, "354").await?;

        let subject = command
            .metadata
            .get("subject")
            .map(String::as_str)
            .unwrap_or("(no subject)");
        send_line(&mut stream, &format!("From: <{}>", self.config.from)).await?;
        send_line(&mut stream, &format!("To: <{}>", command.target)).await?;
        send_line(&mut stream, &format!("Subject: {subject}")).await?;
        send_line(&mut stream, "").await?;
        for line in command.content.lines() {
            // Dot-stuffing per RFC 5321.
            if line.starts_with('.') {
                send_line(&mut stream, &format!(".{line}")).await?;
            } else {
                send_line(&mut stream, line).await?;
            }
        }
        send_line(&mut stream, ".").await?;
        expect_reply(&mut stream, "250").await?;
        send_line(&mut stream, "QUIT").await?;
        Ok(())
    }
}

async fn send_line(stream: &mut BufStream<TcpStream>, line: &str) -> Result<(), PlatformError> {
    stream
        .write_all(line.as_bytes())
        .await
        .map_err(|e| PlatformError::Transient(format!("relay write: {e}")))?;
    stream
        .write_all(b"\r\n")
        .await
        .map_err(|e| PlatformError::Transient(format!("relay write: {e}")))?;
    stream
        .flush()
        .await
        .map_err(|e| PlatformError::Transient(format!("relay write: {e}")))
}

/// Read one (possibly multi-line) reply and require the given code.
async fn expect_reply(
    stream: &mut BufStream<TcpStream>,
    expected: &str,
) -> Result<(), PlatformError> {
    loop {
        let mut line = String::new();
        let n = tokio::time::timeout(SMTP_TIMEOUT, stream.read_line(&mut line))
            .await
            .map_err(|_| PlatformError::Transient("relay read timeout".to_string()))?
            .map_err(|e| PlatformError::Transient(format!("relay read: {e}")))?;
        if n == 0 {
            return Err(PlatformError::Transient(
                "relay closed the connection".to_string(),
            ));
        }
        let trimmed = line.trim_end();
        // Continuation lines look like `250-...`; the final line `250 ...`.
        if trimmed.as_bytes().get(3) == Some(&b'-') {
            continue;
        }

        if trimmed.starts_with(expected) {
            return Ok(());
        }
        return Err(match trimmed.chars().next() {
            Some('4') => PlatformError::Transient(format!("relay answered: {trimmed}")),
            _ => PlatformError::Permanent(format!("relay answered: {trimmed}")),
        });
    }
}

#[async_trait]
impl Sender for SmtpSender {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Email
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled && self.config.relay.is_some()
    }

    async fn send(&self, command: &OutputCommand) -> Result<(), PlatformError> {
        match self.relay_message(command).await {
            Ok(()) => {
                self.counters.success();
                tracing::debug!(command = %command.id, "email relayed");
                Ok(())
            }
            Err(e) => {
                self.counters.failure();
                Err(e)
            }
        }
    }

    fn stats(&self) -> SenderStats {
        self.counters
            .snapshot("email", ChannelType::Email, self.is_enabled())
    }
}
