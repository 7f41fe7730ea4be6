//! IRC sender.
//!
//! Maintains one registered connection with reconnect backoff; `send`
//! queues a PRIVMSG onto the writer task and fails transient while the
//! connection is down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use fr0g_core::error::PlatformError;
use fr0g_core::shutdown::ShutdownToken;
use fr0g_core::types::{ChannelType, OutputCommand};

use crate::config::IrcSenderConfig;

use super::{SendCounters, Sender, SenderStats};

const RECONNECT_BASE: Duration = Duration::from_secs(2);
const RECONNECT_CAP: Duration = Duration::from_secs(300);
const OUTBOUND_BUFFER: usize = 128;

/// Sends commands as PRIVMSG lines.
pub struct IrcSender {
    config: IrcSenderConfig,
    connected: Arc<AtomicBool>,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    counters: SendCounters,
}

impl IrcSender {
    /// Build the sender.
    pub fn new(config: IrcSenderConfig) -> Self {
        Self {
            config,
            connected: Arc::new(AtomicBool::new(false)),
            outbound: Mutex::new(None),
            counters: SendCounters::default(),
        }
    }
}

#[async_trait]
impl Sender for IrcSender {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Irc
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled && self.config.server.is_some()
    }

    async fn start(&self, shutdown: ShutdownToken) -> Result<(), PlatformError> {
        let Some(server) = self.config.server.clone() else {
            return Ok(());
        };
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        *self.outbound.lock() = Some(tx);

        let task = ConnectionTask {
            server,
            nickname: self.config.nickname.clone(),
            connected: Arc::clone(&self.connected),
        };
        tokio::spawn(task.run(rx, shutdown));
        Ok(())
    }

    async fn send(&self, command: &OutputCommand) -> Result<(), PlatformError> {
        if !self.connected.load(Ordering::Relaxed) {
            self.counters.failure();
            return Err(PlatformError::NotConnected("irc server".to_string()));
        }
        let outbound = self.outbound.lock().clone();
        let Some(outbound) = outbound else {
            self.counters.failure();
            return Err(PlatformError::NotConnected("irc sender not started".to_string()));
        };

        // One PRIVMSG per content line keeps the wire protocol valid.
        for line in command.content.lines() {
            let message = format!("PRIVMSG {} :{}\r\n", command.target, line);
            if outbound.try_send(message).is_err() {
                self.counters.failure();
                return Err(PlatformError::Transient(
                    "irc outbound buffer full".to_string(),
                ));
            }
        }
        self.counters.success();
        Ok(())
    }

    fn stats(&self) -> SenderStats {
        self.counters
            .snapshot("irc", ChannelType::Irc, self.is_enabled())
    }
}

struct ConnectionTask {
    server: String,
    nickname: String,
    connected: Arc<AtomicBool>,
}

impl ConnectionTask {
    async fn run(self, mut outbound: mpsc::Receiver<String>, mut shutdown: ShutdownToken) {
        let mut delay = RECONNECT_BASE;
        loop {
            if shutdown.is_shutdown() {
                return;
            }
            match TcpStream::connect(&self.server).await {
                Ok(stream) => {
                    delay = RECONNECT_BASE;
                    let ended = tokio::select! {
                        _ = shutdown.cancelled() => return,
                        ended = self.drive(stream, &mut outbound) => ended,
                    };
                    self.connected.store(false, Ordering::Relaxed);
                    if let Err(e) = ended {
                        tracing::warn!(server = %self.server, error = %e, "irc sender disconnected");
                    }
                }
                Err(e) => {
                    tracing::warn!(server = %self.server, error = %e, "irc sender connect failed");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(RECONNECT_CAP);
        }
    }

    async fn drive(
        &self,
        stream: TcpStream,
        outbound: &mut mpsc::Receiver<String>,
    ) -> Result<(), std::io::Error> {
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
            tokio::select! {
                read = reader.read_line(&mut line) => {
                    if read? == 0 {
                        return Ok(());
                    }
                    let trimmed = line.trim_end().to_string();
                    line.clear();
                    let mut words = trimmed.split_ascii_whitespace();
                    let first = words.next().unwrap_or("");
                    if first == "PING" {
                        let token = trimmed
                            .split_once(':')
                            .map(|(_, t)| t)
                            .unwrap_or("");
                        writer.write_all(format!("PONG :{token}\r\n").as_bytes()).await?;
                    } else if words.next() == Some("001") {
                        self.connected.store(true, Ordering::Relaxed);
                        tracing::info!(server = %self.server, "irc sender registered");
                    }
                }
                message = outbound.recv() => {
                    match message {
                        Some(message) => writer.write_all(message.as_bytes()).await?,
                        None => return Ok(()),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use fr0g_core::shutdown::ShutdownController;

    use super::*;

    fn command(target: &str, content: &str) -> OutputCommand {
        OutputCommand::from(fr0g_core::types::OutputAction {
            id: "c1".to_string(),
            channel: ChannelType::Irc,
            target: target.to_string(),
            content: content.to_string(),
            metadata: Default::default(),
            priority: 0,
        })
    }

    #[tokio::test]
    async fn test_send_before_registration_is_not_connected() {
        let sender = IrcSender::new(IrcSenderConfig {
            enabled: true,
            server: Some("127.0.0.1:1".to_string()),
            nickname: "fr0g".to_string(),
        });
        let controller = ShutdownController::new();
        sender.start(controller.token()).await.unwrap();

        let err = sender.send(&command("#ops", "hi")).await.unwrap_err();
        assert!(err.is_transient());
        controller.trigger();
    }

    #[tokio::test]
    async fn test_registered_sender_writes_privmsg() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let sender = IrcSender::new(IrcSenderConfig {
            enabled: true,
            server: Some(addr.to_string()),
            nickname: "fr0g".to_string(),
        });
        let controller = ShutdownController::new();
        sender.start(controller.token()).await.unwrap();

        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap(); // NICK
        line.clear();
        reader.read_line(&mut line).await.unwrap(); // USER
        writer
            .write_all(b":irc.test 001 fr0g :Welcome\r\n")
            .await
            .unwrap();

        // Wait for the registration flag to flip.
        for _ in 0..100 {
            if sender.connected.load(Ordering::Relaxed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        sender.send(&command("#ops", "all clear")).await.unwrap();
        line.clear();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line.trim_end(), "PRIVMSG #ops :all clear");

        controller.trigger();
    }
}
