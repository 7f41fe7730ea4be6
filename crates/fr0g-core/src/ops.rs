//! Operational HTTP surface embedded by every service.
//!
//! Serves the introspection routes (`/health`, `/status`, `/queue/status`,
//! `/queue/stats`, `/processors`, `/outputs`) from a service-provided
//! [`OpsSource`], behind the shared [`SecurityLayer`]. Services with extra
//! user-facing routes (webhooks, the review API) hook them in via
//! [`OpsSource::route`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use crate::error::PlatformError;
use crate::http::security::SecurityLayer;
use crate::http::{json_response, not_found};
use crate::shutdown::ShutdownToken;

/// Introspection data provider implemented by each service.
#[async_trait]
pub trait OpsSource: Send + Sync {
    /// Logical service name reported on `/health`.
    fn service_name(&self) -> &str;

    /// Version string reported on `/health`.
    fn version(&self) -> &str;

    /// Service-specific snapshot for `/status`.
    async fn status(&self) -> serde_json::Value;

    /// Depth/capacity of owned queues for `/queue/status`.
    async fn queue_status(&self) -> serde_json::Value {
        serde_json::json!({})
    }

    /// Counters of owned queues for `/queue/stats`.
    async fn queue_stats(&self) -> serde_json::Value {
        serde_json::json!({})
    }

    /// Registered processors for `/processors`.
    async fn processors(&self) -> serde_json::Value {
        serde_json::json!([])
    }

    /// Registered outputs for `/outputs`.
    async fn outputs(&self) -> serde_json::Value {
        serde_json::json!([])
    }

    /// Service-specific routes. Return `None` to fall through to 404.
    async fn route(&self, request: Request<Incoming>) -> Option<Response<String>> {
        let _ = request;
        None
    }
}

/// Operational HTTP server, bound and ready to serve.
pub struct OpsServer {
    listener: TcpListener,
    source: Arc<dyn OpsSource>,
    security: Arc<SecurityLayer>,
    started_at: Instant,
}

impl OpsServer {
    /// Bind the listener. Failing to bind is fatal for the process.
    pub async fn bind(
        addr: &str,
        source: Arc<dyn OpsSource>,
        security: SecurityLayer,
    ) -> Result<Self, PlatformError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| PlatformError::Fatal(format!("cannot bind {addr}: {e}")))?;
        Ok(Self {
            listener,
            source,
            security: Arc::new(security),
            started_at: Instant::now(),
        })
    }

    /// The actual bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.listener
            .local_addr()
            .unwrap_or_else(|_| ([0, 0, 0, 0], 0).into())
    }

    /// Accept connections until the shutdown token fires.
    pub async fn serve(self, mut shutdown: ShutdownToken) {
        tracing::info!(
            addr = %self.local_addr(),
            service = self.source.service_name(),
            "ops listener up"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let io = TokioIo::new(stream);
                    let source = Arc::clone(&self.source);
                    let security = Arc::clone(&self.security);
                    let started_at = self.started_at;

                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            let source = Arc::clone(&source);
                            let security = Arc::clone(&security);
                            async move {
                                Ok::<_, std::convert::Infallible>(
                                    handle(req, source, security, started_at, peer).await,
                                )
                            }
                        });
                        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                            if !e.is_incomplete_message() {
                                tracing::debug!(error = %e, "ops connection error");
                            }
                        }
                    });
                }
            }
        }
    }
}

async fn handle(
    request: Request<Incoming>,
    source: Arc<dyn OpsSource>,
    security: Arc<SecurityLayer>,
    started_at: Instant,
    peer: SocketAddr,
) -> Response<String> {
    if let Some(preflight) = security.preflight(request.method()) {
        return preflight;
    }
    if let Err(denied) = security.check(request.headers(), &peer.ip().to_string()) {
        return denied;
    }

    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let mut response = match (&method, path.as_str()) {
        (&Method::GET, "/health") => json_response(
            StatusCode::OK,
            &serde_json::json!({
                "status": "healthy",
                "service": source.service_name(),
                "timestamp": chrono::Utc::now(),
                "version": source.version(),
                "uptime_seconds": started_at.elapsed().as_secs(),
            }),
        ),
        (&Method::GET, "/status") => json_response(StatusCode::OK, &source.status().await),
        (&Method::GET, "/queue/status") => {
            json_response(StatusCode::OK, &source.queue_status().await)
        }
        (&Method::GET, "/queue/stats") => {
            json_response(StatusCode::OK, &source.queue_stats().await)
        }
        (&Method::GET, "/processors") => {
            json_response(StatusCode::OK, &source.processors().await)
        }
        (&Method::GET, "/outputs") => json_response(StatusCode::OK, &source.outputs().await),
        _ => match source.route(request).await {
            Some(response) => response,
            None => not_found(),
        },
    };

    security.apply_cors(&mut response);
    response
}
