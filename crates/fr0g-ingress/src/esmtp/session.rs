//! One ESMTP session: command grammar, state machine, DATA handling.
//!
//! The accepted command sequence is fixed:
//! `{connected -> helo -> mail_from -> rcpt_to -> data -> helo}`. Commands
//! out of state answer 503. DATA is terminated by a lone dot, leading
//! double dots are unstuffed, and bodies over the configured size answer
//! 552 after the terminator.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};

use fr0g_core::error::PlatformError;
use fr0g_core::types::{ChannelType, InputEvent};

use crate::adapter::StatsCell;
use crate::forwarder::EventSink;

const HOSTNAME: &str = "fr0g.local";

/// Why a session loop returned.
pub enum SessionEnd<S> {
    /// QUIT, EOF, or protocol error; the connection is done.
    Closed,
    /// The client asked for STARTTLS; the caller upgrades this stream and
    /// runs a fresh session over it.
    StartTls(S),
}

/// Shared hooks the session needs from the adapter.
pub struct SessionContext {
    /// Where completed messages go.
    pub sink: Arc<dyn EventSink>,
    /// Adapter counters.
    pub stats: Arc<StatsCell>,
    /// Maximum accepted DATA size in bytes.
    pub max_message_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Connected,
    Helo,
    MailFrom,
    RcptTo,
}

struct Envelope {
    mail_from: String,
    rcpt_to: Vec<String>,
}

impl Envelope {
    fn empty() -> Self {
        Self {
            mail_from: String::new(),
            rcpt_to: Vec::new(),
        }
    }
}

/// Run one session over a fresh or just-upgraded stream.
///
/// `greet` controls the initial 220 banner: sent on new connections, not
/// after a TLS upgrade. `tls_available` advertises and accepts STARTTLS.
pub async fn run<S>(
    stream: S,
    ctx: &SessionContext,
    greet: bool,
    tls_available: bool,
) -> std::io::Result<SessionEnd<S>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut stream = BufStream::new(stream);
    if greet {
        reply(&mut stream, &format!("220 {HOSTNAME} ESMTP service ready")).await?;
    }

    let mut state = State::Connected;
    let mut envelope = Envelope::empty();
    let mut line = String::new();

    loop {
        line.clear();
        if stream.read_line(&mut line).await? == 0 {
            return Ok(SessionEnd::Closed);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        let verb = command_verb(trimmed);

        match verb.as_str() {
            "HELO" => {
                state = State::Helo;
                envelope = Envelope::empty();
                reply(&mut stream, &format!("250 {HOSTNAME}")).await?;
            }
            "EHLO" => {
                state = State::Helo;
                envelope = Envelope::empty();
                reply(&mut stream, &format!("250-{HOSTNAME}")).await?;
                reply(&mut stream, &format!("250-SIZE {}", ctx.max_message_size)).await?;
                if tls_available {
                    reply(&mut stream, "250-STARTTLS").await?;
                }
                reply(&mut stream, "250 OK").await?;
            }
            "MAIL" => {
                if state != State::Helo {
                    reply(&mut stream, "503 bad sequence of commands").await?;
                    continue;
                }
                match address_of(trimmed, "MAIL FROM:") {
                    Some(address) => {
                        envelope.mail_from = address;
                        state = State::MailFrom;
                        reply(&mut stream, "250 OK").await?;
                    }
                    None => reply(&mut stream, "501 syntax error in parameters").await?,
                }
            }
            "RCPT" => {
                if state != State::MailFrom && state != State::RcptTo {
                    reply(&mut stream, "503 bad sequence of commands").await?;
                    continue;
                }
                match address_of(trimmed, "RCPT TO:") {
                    Some(address) => {
                        envelope.rcpt_to.push(address);
                        state = State::RcptTo;
                        reply(&mut stream, "250 OK").await?;
                    }
                    None => reply(&mut stream, "501 syntax error in parameters").await?,
                }
            }
            "DATA" => {
                if state != State::RcptTo {
                    reply(&mut stream, "503 bad sequence of commands").await?;
                    continue;
                }
                reply(&mut stream, "354 end data with <CRLF>.<CRLF>").await?;
                let body = read_data(&mut stream, ctx.max_message_size).await?;
                match body {
                    Some(data) => {
                        let event = event_from(&envelope, &data);
                        let id = event.id.clone();
                        match ctx.sink.submit(event).await {
                            Ok(()) => {
                                ctx.stats.event();
                                reply(&mut stream, "250 OK message queued").await?;
                            }
                            Err(PlatformError::QueueFull) => {
                                ctx.stats.dropped();
                                reply(&mut stream, "451 server busy, try again later").await?;
                            }
                            Err(e) => {
                                ctx.stats.error();
                                tracing::warn!(event = %id, error = %e, "smtp event lost");
                                reply(&mut stream, "451 local error in processing").await?;
                            }
                        }
                    }
                    None => {
                        reply(&mut stream, "552 message size exceeds fixed maximum").await?;
                    }
                }
                state = State::Helo;
                envelope = Envelope::empty();
            }
            "RSET" => {
                envelope = Envelope::empty();
                if state != State::Connected {
                    state = State::Helo;
                }
                reply(&mut stream, "250 OK").await?;
            }
            "NOOP" => reply(&mut stream, "250 OK").await?,
            "QUIT" => {
                reply(&mut stream, &format!("221 {HOSTNAME} closing connection")).await?;
                return Ok(SessionEnd::Closed);
            }
            "STARTTLS" => {
                if !tls_available {
                    reply(&mut stream, "454 TLS not available").await?;
                    continue;
                }
                if state != State::Helo {
                    reply(&mut stream, "503 bad sequence of commands").await?;
                    continue;
                }
                reply(&mut stream, "220 ready to start TLS").await?;
                return Ok(SessionEnd::StartTls(stream.into_inner()));
            }
            _ => reply(&mut stream, "500 command unrecognized").await?,
        }
    }
}

async fn reply<S>(stream: &mut BufStream<S>, line: &str) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;
    stream.flush().await
}

fn command_verb(line: &str) -> String {
    line.split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_uppercase()
}

fn address_of(line: &str, prefix: &str) -> Option<String> {
    let head = line.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let rest = line[prefix.len()..].trim();
    let address = rest
        .strip_prefix('<')
        .and_then(|r| r.strip_suffix('>'))
        .unwrap_or(rest);
    (!address.is_empty()).then(|| address.to_string())
}

/// Read the DATA body until the lone-dot terminator. Returns `None` when
/// the size limit was exceeded (the stream is still drained to the
/// terminator so the session can continue).
async fn read_data<S>(
    stream: &mut BufStream<S>,
    max_size: usize,
) -> std::io::Result<Option<String>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut body = String::new();
    let mut line = String::new();
    let mut oversized = false;

    loop {
        line.clear();
        if stream.read_line(&mut line).await? == 0 {
            // Treat EOF mid-DATA as a truncated, oversized-equivalent abort.
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed == "." {
            break;
        }
        // Dot-unstuffing per RFC 5321: strip one leading dot from any
        // stuffed line.
        let text = match trimmed.strip_prefix('.') {
            Some(rest) => rest,
            None => trimmed,
        };
        if !oversized {
            if body.len() + text.len() + 1 > max_size {
                oversized = true;
            } else {
                body.push_str(text);
                body.push('\n');
            }
        }
    }

    Ok(if oversized { None } else { Some(body) })
}

fn event_from(envelope: &Envelope, data: &str) -> InputEvent {
    let (subject, body) = split_message(data);
    let mut event = InputEvent::new(
        format!("email_{}", uuid::Uuid::new_v4()),
        ChannelType::Email,
        envelope.mail_from.clone(),
        body,
    )
    .with_metadata("from", envelope.mail_from.clone())
    .with_metadata("to", envelope.rcpt_to.join(","));
    if let Some(subject) = subject {
        event = event.with_metadata("subject", subject);
    }
    event
}

/// Split a message into its Subject header and the body after the header
/// block.
fn split_message(data: &str) -> (Option<String>, String) {
    let mut subject = None;
    let mut offset = 0;
    let mut body_start = None;

    for line in data.split_inclusive('\n') {
        let trimmed = line.trim_end_matches('\n');
        if trimmed.is_empty() {
            body_start = Some(offset + line.len());
            break;
        }
        if let Some(rest) = strip_header(trimmed, "subject:") {
            subject = Some(rest.trim().to_string());
        }
        offset += line.len();
    }

    // Without a header/body separator the whole message is the body.
    let body = match body_start {
        Some(start) => &data[start..],
        None => data,
    };
    (subject, body.trim_end().to_string())
}

fn strip_header<'a>(line: &'a str, header: &str) -> Option<&'a str> {
    let head = line.get(..header.len())?;
    if head.eq_ignore_ascii_case(header) {
        Some(&line[header.len()..])
    } else {
        None
    }
}
