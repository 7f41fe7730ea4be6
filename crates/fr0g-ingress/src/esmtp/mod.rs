//! ESMTP listener adapter.
//!
//! Accepts SMTP connections with one task per connection, bounded by
//! `max_connections`. Session semantics live in [`session`]; this module
//! owns the listener, the connection bound, and the optional STARTTLS
//! acceptor.

pub mod session;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_rustls::TlsAcceptor;

use fr0g_core::error::PlatformError;
use fr0g_core::shutdown::{ShutdownController, ShutdownToken};
use fr0g_core::types::ChannelType;

use crate::adapter::{AdapterStats, ChannelAdapter, StatsCell};
use crate::config::EsmtpAdapterConfig;
use crate::forwarder::EventSink;

use session::{SessionContext, SessionEnd};

/// The ESMTP adapter.
pub struct EsmtpAdapter {
    config: EsmtpAdapterConfig,
    sink: Arc<dyn EventSink>,
    stats: Arc<StatsCell>,
    local: ShutdownController,
    bound_addr: Mutex<Option<SocketAddr>>,
}

impl EsmtpAdapter {
    /// Build the adapter.
    pub fn new(config: EsmtpAdapterConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            sink,
            stats: Arc::new(StatsCell::default()),
            local: ShutdownController::new(),
            bound_addr: Mutex::new(None),
        }
    }

    /// The bound address once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound_addr.lock()
    }

    fn tls_acceptor(&self) -> Result<Option<TlsAcceptor>, PlatformError> {
        let (Some(cert_path), Some(key_path)) = (&self.config.tls_cert, &self.config.tls_key)
        else {
            return Ok(None);
        };

        let certs = rustls_pemfile::certs(&mut std::io::BufReader::new(
            std::fs::File::open(cert_path)
                .map_err(|e| PlatformError::Config(format!("cannot read {cert_path}: {e}")))?,
        ))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| PlatformError::Config(format!("bad certificate {cert_path}: {e}")))?;

        let key = rustls_pemfile::private_key(&mut std::io::BufReader::new(
            std::fs::File::open(key_path)
                .map_err(|e| PlatformError::Config(format!("cannot read {key_path}: {e}")))?,
        ))
        .map_err(|e| PlatformError::Config(format!("bad key {key_path}: {e}")))?
        .ok_or_else(|| PlatformError::Config(format!("no private key in {key_path}")))?;

        let server_config = tokio_rustls::rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| PlatformError::Config(format!("tls configuration: {e}")))?;
        Ok(Some(TlsAcceptor::from(Arc::new(server_config))))
    }
}

#[async_trait]
impl ChannelAdapter for EsmtpAdapter {
    fn name(&self) -> &'static str {
        "esmtp-listener"
    }

    fn channel(&self) -> ChannelType {
        ChannelType::Email
    }

    async fn start(&self, shutdown: ShutdownToken) -> Result<(), PlatformError> {
        let addr = format!("0.0.0.0:{}", self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| PlatformError::Fatal(format!("cannot bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| PlatformError::Fatal(e.to_string()))?;
        *self.bound_addr.lock() = Some(local_addr);

        let acceptor = self.tls_acceptor()?;
        tracing::info!(
            addr = %local_addr,
            tls = acceptor.is_some(),
            "esmtp adapter listening"
        );

        let limiter = Arc::new(Semaphore::new(self.config.max_connections));
        let sink = Arc::clone(&self.sink);
        let stats = Arc::clone(&self.stats);
        let max_message_size = self.config.max_message_size;
        let mut external = shutdown;
        let mut local = self.local.token();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = external.cancelled() => return,
                    _ = local.cancelled() => return,
                    accepted = listener.accept() => {
                        let Ok((stream, peer)) = accepted else { continue };
                        let Ok(permit) = Arc::clone(&limiter).acquire_owned().await else {
                            return;
                        };
                        let ctx = SessionContext {
                            sink: Arc::clone(&sink),
                            stats: Arc::clone(&stats),
                            max_message_size,
                        };
                        let acceptor = acceptor.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            if let Err(e) = serve_connection(stream, ctx, acceptor).await {
                                tracing::debug!(peer = %peer, error = %e, "smtp session error");
                            }
                        });
                    }
                }
            }
        });
        Ok(())
    }

    fn stop(&self) {
        self.local.trigger();
    }

    fn stats(&self) -> AdapterStats {
        self.stats.snapshot(self.name(), ChannelType::Email)
    }
}

async fn serve_connection(
    stream: TcpStream,
    ctx: SessionContext,
    acceptor: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    match session::run(stream, &ctx, true, acceptor.is_some()).await? {
        SessionEnd::Closed => Ok(()),
        SessionEnd::StartTls(inner) => {
            let Some(acceptor) = acceptor else {
                return Ok(());
            };
            let tls_stream = acceptor.accept(inner).await?;
            // Post-handshake session starts from a clean state with no new
            // banner; STARTTLS is not offered twice.
            match session::run(tls_stream, &ctx, false, false).await? {
                SessionEnd::Closed | SessionEnd::StartTls(_) => Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use crate::forwarder::testing::CollectingSink;

    use super::*;

    #[tokio::test]
    async fn test_listener_accepts_and_queues_mail() {
        let sink = Arc::new(CollectingSink::default());
        let adapter = EsmtpAdapter::new(
            EsmtpAdapterConfig {
                enabled: true,
                port: 0,
                ..EsmtpAdapterConfig::default()
            },
            sink.clone() as Arc<dyn EventSink>,
        );
        let controller = ShutdownController::new();
        adapter.start(controller.token()).await.unwrap();
        let addr = adapter.local_addr().unwrap();

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        reader.read_line(&mut line).await.unwrap();
        assert!(line.starts_with("220 "));

        writer
            .write_all(
                b"HELO tester\r\nMAIL FROM:<a@b>\r\nRCPT TO:<c@d>\r\nDATA\r\nSubject: t\r\n\r\nbody\r\n.\r\nQUIT\r\n",
            )
            .await
            .unwrap();

        let mut responses = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await.unwrap() == 0 {
                break;
            }
            responses.push_str(&line);
        }
        assert!(responses.contains("250 OK message queued"));
        assert!(responses.contains("221 "));
        assert_eq!(sink.events.lock().len(), 1);

        controller.trigger();
    }
}
