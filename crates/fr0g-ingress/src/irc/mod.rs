//! IRC client adapter.
//!
//! Maintains one connection per configured server with exponential
//! reconnect, registers, joins the configured channels, answers PING, and
//! emits one event per PRIVMSG/NOTICE line. Floods and repeated identical
//! lines raise the event's priority floor and are flagged in metadata; the
//! adapter itself never judges threat level.

pub mod parse;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use fr0g_core::error::PlatformError;
use fr0g_core::shutdown::{ShutdownController, ShutdownToken};
use fr0g_core::types::{ChannelType, InputEvent};

use crate::adapter::{AdapterStats, ChannelAdapter, StatsCell};
use crate::config::IrcAdapterConfig;
use crate::forwarder::EventSink;

const RECONNECT_CAP: Duration = Duration::from_secs(300);
const FLOOD_WINDOW: Duration = Duration::from_secs(10);
const FLOOD_THRESHOLD: usize = 5;
const REPEAT_THRESHOLD: u32 = 3;
const FLOOD_PRIORITY_FLOOR: u8 = 3;
const REPEAT_PRIORITY_FLOOR: u8 = 2;

/// Tracks per-source message rate inside a sliding window.
struct FloodTracker {
    seen: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl FloodTracker {
    fn new() -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Record one message and report whether the source is flooding.
    fn note(&self, source: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock();
        let times = seen.entry(source.to_string()).or_default();
        while times
            .front()
            .map(|t| now.duration_since(*t) > FLOOD_WINDOW)
            .unwrap_or(false)
        {
            times.pop_front();
        }
        times.push_back(now);
        times.len() > FLOOD_THRESHOLD
    }
}

/// Tracks identical consecutive lines per source.
struct RepeatTracker {
    last: Mutex<HashMap<String, (String, u32)>>,
}

impl RepeatTracker {
    fn new() -> Self {
        Self {
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Record one line and return how many times in a row the source has
    /// sent it.
    fn note(&self, source: &str, content: &str) -> u32 {
        let mut last = self.last.lock();
        match last.get_mut(source) {
            Some((previous, count)) if previous == content => {
                *count += 1;
                *count
            }
            _ => {
                last.insert(source.to_string(), (content.to_string(), 1));
                1
            }
        }
    }
}

/// The IRC adapter.
pub struct IrcAdapter {
    config: IrcAdapterConfig,
    sink: Arc<dyn EventSink>,
    stats: Arc<StatsCell>,
    flood: Arc<FloodTracker>,
    repeats: Arc<RepeatTracker>,
    local: ShutdownController,
}

impl IrcAdapter {
    /// Build the adapter.
    pub fn new(config: IrcAdapterConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            sink,
            stats: Arc::new(StatsCell::default()),
            flood: Arc::new(FloodTracker::new()),
            repeats: Arc::new(RepeatTracker::new()),
            local: ShutdownController::new(),
        }
    }
}

#[async_trait]
impl ChannelAdapter for IrcAdapter {
    fn name(&self) -> &'static str {
        "irc-client"
    }

    fn channel(&self) -> ChannelType {
        ChannelType::Irc
    }

    async fn start(&self, shutdown: ShutdownToken) -> Result<(), PlatformError> {
        for server in &self.config.servers {
            let task = ServerTask {
                server: server.clone(),
                nickname: self.config.nickname.clone(),
                channels: self.config.channels.clone(),
                reconnect_base: Duration::from_secs(self.config.reconnect_base.max(1)),
                sink: Arc::clone(&self.sink),
                stats: Arc::clone(&self.stats),
                flood: Arc::clone(&self.flood),
                repeats: Arc::clone(&self.repeats),
            };
            let external = shutdown.clone();
            let local = self.local.token();
            tokio::spawn(task.run(external, local));
        }
        Ok(())
    }

    fn stop(&self) {
        self.local.trigger();
    }

    fn stats(&self) -> AdapterStats {
        self.stats.snapshot(self.name(), ChannelType::Irc)
    }
}

struct ServerTask {
    server: String,
    nickname: String,
    channels: Vec<String>,
    reconnect_base: Duration,
    sink: Arc<dyn EventSink>,
    stats: Arc<StatsCell>,
    flood: Arc<FloodTracker>,
    repeats: Arc<RepeatTracker>,
}

impl ServerTask {
    async fn run(self, mut external: ShutdownToken, mut local: ShutdownToken) {
        let mut delay = self.reconnect_base;
        loop {
            if external.is_shutdown() || local.is_shutdown() {
                return;
            }
            match TcpStream::connect(&self.server).await {
                Ok(stream) => {
                    tracing::info!(server = %self.server, "irc connected");
                    delay = self.reconnect_base;
                    let ended = tokio::select! {
                        _ = external.cancelled() => return,
                        _ = local.cancelled() => return,
                        ended = self.drive(stream) => ended,
                    };
                    if let Err(e) = ended {
                        self.stats.error();
                        tracing::warn!(server = %self.server, error = %e, "irc connection lost");
                    }
                }
                Err(e) => {
                    self.stats.error();
                    tracing::warn!(server = %self.server, error = %e, "irc connect failed");
                }
            }

            tokio::select! {
                _ = external.cancelled() => return,
                _ = local.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(RECONNECT_CAP);
        }
    }

    async fn drive(&self, stream: TcpStream) -> Result<(), std::io::Error> {
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        writer
            .write_all(format!("NICK {}\r\n", self.nickname).as_bytes())
            .await?;
        writer
            .write_all(format!("USER {} 0 * :{}\r\n", self.nickname, self.nickname).as_bytes())
            .await?;

        loop {
            line.clear();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                return Ok(());
            }
            let Some(parsed) = parse::parse(&line) else {
                continue;
            };

            match parsed.command {
                "PING" => {
                    let token = parsed.trailing.unwrap_or("");
                    writer
                        .write_all(format!("PONG :{token}\r\n").as_bytes())
                        .await?;
                }
                "001" => {
                    for channel in &self.channels {
                        writer
                            .write_all(format!("JOIN {channel}\r\n").as_bytes())
                            .await?;
                    }
                }
                "PRIVMSG" | "NOTICE" => {
                    if let Some(event) = self.event_from(&parsed) {
                        let id = event.id.clone();
                        match self.sink.submit(event).await {
                            Ok(()) => self.stats.event(),
                            Err(e) => {
                                self.stats.dropped();
                                tracing::warn!(event = %id, error = %e, "irc event dropped");
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn event_from(&self, line: &parse::IrcLine<'_>) -> Option<InputEvent> {
        let source = line.prefix?.to_string();
        let target = line.params.first()?.to_string();
        let content = line.trailing?.to_string();

        let mut event = InputEvent::new(
            format!("irc_{}", uuid::Uuid::new_v4()),
            ChannelType::Irc,
            source.clone(),
            content.clone(),
        )
        .with_metadata("channel", target)
        .with_metadata("command", line.command.to_string())
        .with_metadata("server", self.server.clone());
        if let Some(nick) = line.nick() {
            event = event.with_metadata("nick", nick.to_string());
        }

        if self.flood.note(&source) {
            event = event.with_metadata("flood", "true");
            event.raise_priority_floor(FLOOD_PRIORITY_FLOOR);
        }
        if self.repeats.note(&source, &content) >= REPEAT_THRESHOLD {
            event = event.with_metadata("repeat", "true");
            event.raise_priority_floor(REPEAT_PRIORITY_FLOOR);
        }

        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    use crate::forwarder::testing::CollectingSink;

    use super::*;

    #[test]
    fn test_flood_tracker_trips_past_threshold() {
        let tracker = FloodTracker::new();
        for _ in 0..FLOOD_THRESHOLD {
            assert!(!tracker.note("alice!a@h"));
        }
        assert!(tracker.note("alice!a@h"));
        // Other sources are unaffected.
        assert!(!tracker.note("bob!b@h"));
    }

    #[test]
    fn test_repeat_tracker_counts_identical_lines() {
        let tracker = RepeatTracker::new();
        assert_eq!(tracker.note("alice", "spam"), 1);
        assert_eq!(tracker.note("alice", "spam"), 2);
        assert_eq!(tracker.note("alice", "spam"), 3);
        assert_eq!(tracker.note("alice", "fresh"), 1);
    }

    #[tokio::test]
    async fn test_adapter_registers_and_emits_events() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let sink = Arc::new(CollectingSink::default());
        let adapter = IrcAdapter::new(
            IrcAdapterConfig {
                enabled: true,
                servers: vec![addr.to_string()],
                nickname: "fr0g".to_string(),
                channels: vec!["#ops".to_string()],
                reconnect_base: 1,
            },
            sink.clone() as Arc<dyn EventSink>,
        );
        let controller = ShutdownController::new();
        adapter.start(controller.token()).await.unwrap();

        // Act as the server: expect registration, welcome the client, watch
        // the JOIN, then deliver a message.
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        reader.read_line(&mut line).await.unwrap();
        assert!(line.starts_with("NICK fr0g"));
        line.clear();
        reader.read_line(&mut line).await.unwrap();
        assert!(line.starts_with("USER fr0g"));

        writer
            .write_all(b":irc.test 001 fr0g :Welcome\r\n")
            .await
            .unwrap();
        line.clear();
        reader.read_line(&mut line).await.unwrap();
        assert!(line.starts_with("JOIN #ops"));

        writer
            .write_all(b":alice!a@host PRIVMSG #ops :hello fr0g\r\n")
            .await
            .unwrap();

        // Give the adapter a moment to parse and forward.
        for _ in 0..50 {
            if !sink.events.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let events = sink.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].channel, ChannelType::Irc);
        assert_eq!(events[0].source, "alice!a@host");
        assert_eq!(events[0].content, "hello fr0g");
        assert_eq!(events[0].metadata["channel"], "#ops");
        assert_eq!(events[0].metadata["nick"], "alice");
        drop(events);

        controller.trigger();
    }

    #[tokio::test]
    async fn test_ping_answered_with_pong() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let sink = Arc::new(CollectingSink::default());
        let adapter = IrcAdapter::new(
            IrcAdapterConfig {
                enabled: true,
                servers: vec![addr.to_string()],
                nickname: "fr0g".to_string(),
                channels: Vec::new(),
                reconnect_base: 1,
            },
            sink as Arc<dyn EventSink>,
        );
        let controller = ShutdownController::new();
        adapter.start(controller.token()).await.unwrap();

        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap(); // NICK
        line.clear();
        reader.read_line(&mut line).await.unwrap(); // USER

        writer.write_all(b"PING :abc123\r\n").await.unwrap();
        line.clear();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line.trim_end(), "PONG :abc123");

        controller.trigger();
    }
}
