//! The registry's Consul-compatible HTTP surface.
//!
//! - `PUT /v1/agent/service/register` - upsert a ServiceRecord
//! - `PUT /v1/agent/service/deregister/{id}` - remove, idempotent
//! - `PUT /v1/agent/check/update/{id}` - service-pushed health
//! - `GET /v1/catalog/service/{name}` - all records for a name
//! - `GET /v1/health/service/{name}?passing=true` - `[{Service: record}]`
//! - `GET /health` - liveness with the registered service count
//! - `GET /status` - catalog summary

use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use tokio::net::TcpListener;

use fr0g_core::error::PlatformError;
use fr0g_core::http::security::SecurityLayer;
use fr0g_core::http::{
    error_response, json_response, method_not_allowed, not_found, read_json, MAX_BODY_BYTES,
};
use fr0g_core::shutdown::ShutdownToken;
use fr0g_core::types::{HealthStatus, ServiceRecord};

use crate::catalog::Catalog;

#[derive(Debug, Deserialize)]
struct HealthUpdateBody {
    #[serde(rename = "Status")]
    status: HealthStatus,
}

/// The bound registry HTTP server.
pub struct RegistryHttpServer {
    listener: TcpListener,
    catalog: Arc<Catalog>,
    security: Arc<SecurityLayer>,
}

impl RegistryHttpServer {
    /// Bind the listener; a bind failure is fatal.
    pub async fn bind(
        addr: &str,
        catalog: Arc<Catalog>,
        security: SecurityLayer,
    ) -> Result<Self, PlatformError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| PlatformError::Fatal(format!("cannot bind {addr}: {e}")))?;
        Ok(Self {
            listener,
            catalog,
            security: Arc::new(security),
        })
    }

    /// The actual bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.listener
            .local_addr()
            .unwrap_or_else(|_| ([0, 0, 0, 0], 0).into())
    }

    /// Accept connections until shutdown.
    pub async fn serve(self, mut shutdown: ShutdownToken) {
        tracing::info!(addr = %self.local_addr(), "registry listening");
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
                    let catalog = Arc::clone(&self.catalog);
                    let security = Arc::clone(&self.security);

                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            let catalog = Arc::clone(&catalog);
                            let security = Arc::clone(&security);
                            async move {
                                Ok::<_, std::convert::Infallible>(
                                    handle(req, catalog, security, peer).await,
                                )
                            }
                        });
                        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                            if !e.is_incomplete_message() {
                                tracing::debug!(error = %e, "connection error");
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
    catalog: Arc<Catalog>,
    security: Arc<SecurityLayer>,
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
    let query = request.uri().query().unwrap_or("").to_string();

    let mut response = match (&method, path.as_str()) {
        (&Method::PUT, "/v1/agent/service/register") => {
            match read_json::<ServiceRecord>(request.into_body(), MAX_BODY_BYTES).await {
                Ok(record) => {
                    if record.id.is_empty() || record.name.is_empty() {
                        error_response(
                            StatusCode::BAD_REQUEST,
                            "validation_error",
                            "id and name are required",
                        )
                    } else {
                        catalog.register(record);
                        json_response(StatusCode::OK, &serde_json::json!({}))
                    }
                }
                Err(bad) => bad,
            }
        }
        (&Method::GET, "/health") => json_response(
            StatusCode::OK,
            &serde_json::json!({
                "status": "healthy",
                "service_count": catalog.len(),
                "timestamp": chrono::Utc::now(),
            }),
        ),
        (&Method::GET, "/status") => json_response(StatusCode::OK, &catalog.summary()),
        _ => {
            if let Some(id) = path.strip_prefix("/v1/agent/service/deregister/") {
                match &method {
                    &Method::PUT => {
                        catalog.deregister(id);
                        json_response(StatusCode::OK, &serde_json::json!({}))
                    }
                    _ => method_not_allowed(),
                }
            } else if let Some(id) = path.strip_prefix("/v1/agent/check/update/") {
                let id = id.to_string();
                match &method {
                    &Method::PUT => {
                        match read_json::<HealthUpdateBody>(request.into_body(), MAX_BODY_BYTES)
                            .await
                        {
                            Ok(body) => {
                                if catalog.update_health(&id, body.status) {
                                    json_response(StatusCode::OK, &serde_json::json!({}))
                                } else {
                                    error_response(
                                        StatusCode::NOT_FOUND,
                                        "not_found",
                                        &format!("no service with id '{id}'"),
                                    )
                                }
                            }
                            Err(bad) => bad,
                        }
                    }
                    _ => method_not_allowed(),
                }
            } else if let Some(name) = path.strip_prefix("/v1/catalog/service/") {
                match &method {
                    &Method::GET => {
                        json_response(StatusCode::OK, &catalog.list_by_name(name, false))
                    }
                    _ => method_not_allowed(),
                }
            } else if let Some(name) = path.strip_prefix("/v1/health/service/") {
                match &method {
                    &Method::GET => {
                        let passing_only = query
                            .split('&')
                            .any(|pair| pair == "passing=true" || pair == "passing");
                        let wrapped: Vec<serde_json::Value> = catalog
                            .list_by_name(name, passing_only)
                            .into_iter()
                            .map(|record| serde_json::json!({ "Service": record }))
                            .collect();
                        json_response(StatusCode::OK, &wrapped)
                    }
                    _ => method_not_allowed(),
                }
            } else {
                not_found()
            }
        }
    };

    security.apply_cors(&mut response);
    response
}
