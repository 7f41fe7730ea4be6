//! HTTP webhook adapters: SMS, voice, Discord, and generic JSON.
//!
//! Each enabled adapter binds its own port and accepts
//! `POST /webhook/{sms|voice|discord|generic}`. Bodies are optionally
//! verified with HMAC-SHA256 over the raw bytes (hex digest in the
//! `X-Signature` header). When the forwarder is saturated the adapter
//! answers 429 with `Retry-After` instead of blocking its caller.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use sha2::Sha256;
use tokio::net::TcpListener;

use fr0g_core::error::PlatformError;
use fr0g_core::http::{error_response, json_response, read_body, too_many_requests, MAX_BODY_BYTES};
use fr0g_core::shutdown::{ShutdownController, ShutdownToken};
use fr0g_core::types::{ChannelType, InputEvent};

use crate::adapter::{AdapterStats, ChannelAdapter, StatsCell};
use crate::config::WebhookAdapterConfig;
use crate::forwarder::EventSink;

type HmacSha256 = Hmac<Sha256>;

/// One webhook adapter instance.
pub struct WebhookAdapter {
    name: &'static str,
    channel: ChannelType,
    path: &'static str,
    config: WebhookAdapterConfig,
    sink: Arc<dyn EventSink>,
    stats: Arc<StatsCell>,
    local: ShutdownController,
    bound_addr: Mutex<Option<SocketAddr>>,
}

impl WebhookAdapter {
    /// Build the SMS adapter.
    pub fn sms(config: WebhookAdapterConfig, sink: Arc<dyn EventSink>) -> Self {
        Self::new("sms-webhook", ChannelType::Sms, "/webhook/sms", config, sink)
    }

    /// Build the voice transcript adapter.
    pub fn voice(config: WebhookAdapterConfig, sink: Arc<dyn EventSink>) -> Self {
        Self::new(
            "voice-webhook",
            ChannelType::Voice,
            "/webhook/voice",
            config,
            sink,
        )
    }

    /// Build the Discord adapter.
    pub fn discord(config: WebhookAdapterConfig, sink: Arc<dyn EventSink>) -> Self {
        Self::new(
            "discord-webhook",
            ChannelType::Discord,
            "/webhook/discord",
            config,
            sink,
        )
    }

    /// Build the generic JSON adapter.
    pub fn generic(config: WebhookAdapterConfig, sink: Arc<dyn EventSink>) -> Self {
        Self::new(
            "generic-webhook",
            ChannelType::Webhook,
            "/webhook/generic",
            config,
            sink,
        )
    }

    fn new(
        name: &'static str,
        channel: ChannelType,
        path: &'static str,
        config: WebhookAdapterConfig,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            name,
            channel,
            path,
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
}

#[async_trait]
impl ChannelAdapter for WebhookAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn channel(&self) -> ChannelType {
        self.channel
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
        tracing::info!(adapter = self.name, addr = %local_addr, "webhook adapter listening");

        let state = Arc::new(HandlerState {
            channel: self.channel,
            path: self.path,
            signing_secret: self.config.signing_secret.clone(),
            sink: Arc::clone(&self.sink),
            stats: Arc::clone(&self.stats),
        });
        let mut external = shutdown;
        let mut local = self.local.token();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = external.cancelled() => return,
                    _ = local.cancelled() => return,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { continue };
                        let io = TokioIo::new(stream);
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = Arc::clone(&state);
                                async move {
                                    Ok::<_, std::convert::Infallible>(handle(req, state).await)
                                }
                            });
                            let _ = http1::Builder::new().serve_connection(io, service).await;
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
        self.stats.snapshot(self.name, self.channel)
    }
}

struct HandlerState {
    channel: ChannelType,
    path: &'static str,
    signing_secret: Option<String>,
    sink: Arc<dyn EventSink>,
    stats: Arc<StatsCell>,
}

async fn handle(request: Request<Incoming>, state: Arc<HandlerState>) -> Response<String> {
    if request.method() != Method::POST || request.uri().path() != state.path {
        return error_response(StatusCode::NOT_FOUND, "not_found", "no such route");
    }

    let signature = request
        .headers()
        .get("X-Signature")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body = match read_body(request.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(bad) => {
            state.stats.error();
            return bad;
        }
    };

    if let Some(secret) = &state.signing_secret {
        if !signature_valid(secret, &body, signature.as_deref()) {
            state.stats.error();
            return error_response(
                StatusCode::UNAUTHORIZED,
                "invalid_signature",
                "missing or invalid webhook signature",
            );
        }
    }

    let event = match parse_event(state.channel, &body) {
        Ok(event) => event,
        Err(err) => {
            state.stats.error();
            return error_response(StatusCode::BAD_REQUEST, "validation_error", &err.to_string());
        }
    };

    let id = event.id.clone();
    match state.sink.submit(event).await {
        Ok(()) => {
            state.stats.event();
            json_response(
                StatusCode::ACCEPTED,
                &serde_json::json!({ "accepted": true, "id": id }),
            )
        }
        Err(PlatformError::QueueFull) => {
            state.stats.dropped();
            too_many_requests(1)
        }
        Err(err) => {
            state.stats.error();
            fr0g_core::http::platform_error_response(&err)
        }
    }
}

fn signature_valid(secret: &str, body: &[u8], presented: Option<&str>) -> bool {
    let Some(presented) = presented else {
        return false;
    };
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    let expected = hex(&mac.finalize().into_bytes());
    // Length check first keeps the comparison over equal-size inputs.
    presented.len() == expected.len()
        && presented
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn event_id(channel: ChannelType) -> String {
    format!("{}_{}", channel, uuid::Uuid::new_v4())
}

fn parse_event(channel: ChannelType, body: &[u8]) -> Result<InputEvent, PlatformError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| PlatformError::Validation(format!("invalid JSON body: {e}")))?;

    let text = |key: &str| value.get(key).and_then(|v| v.as_str()).map(str::to_string);

    match channel {
        ChannelType::Sms => {
            let from = text("from")
                .ok_or_else(|| PlatformError::Validation("'from' is required".to_string()))?;
            let content = text("body")
                .or_else(|| text("content"))
                .ok_or_else(|| PlatformError::Validation("'body' is required".to_string()))?;
            let mut event = InputEvent::new(event_id(channel), channel, from.clone(), content)
                .with_metadata("from_number", from);
            if let Some(to) = text("to") {
                event = event.with_metadata("to_number", to);
            }
            Ok(event)
        }
        ChannelType::Voice => {
            let from = text("from")
                .ok_or_else(|| PlatformError::Validation("'from' is required".to_string()))?;
            let transcript = text("transcript").ok_or_else(|| {
                PlatformError::Validation("'transcript' is required".to_string())
            })?;
            let mut event =
                InputEvent::new(event_id(channel), channel, from.clone(), transcript)
                    .with_metadata("from_number", from);
            if let Some(call_id) = text("call_id") {
                event = event.with_metadata("call_id", call_id);
            }
            Ok(event)
        }
        ChannelType::Discord => {
            let author = text("author")
                .or_else(|| text("user_id"))
                .ok_or_else(|| PlatformError::Validation("'author' is required".to_string()))?;
            let content = text("content")
                .ok_or_else(|| PlatformError::Validation("'content' is required".to_string()))?;
            let channel_id = text("channel_id").ok_or_else(|| {
                PlatformError::Validation("'channel_id' is required".to_string())
            })?;
            let mut event = InputEvent::new(event_id(channel), channel, author, content)
                .with_metadata("channel_id", channel_id);
            if let Some(guild_id) = text("guild_id") {
                event = event.with_metadata("guild_id", guild_id);
            }
            Ok(event)
        }
        _ => {
            let content = text("content")
                .ok_or_else(|| PlatformError::Validation("'content' is required".to_string()))?;
            let source = text("source").unwrap_or_else(|| "webhook".to_string());
            let mut event = InputEvent::new(event_id(channel), channel, source, content);
            if let Some(map) = value.get("metadata").and_then(|v| v.as_object()) {
                for (key, entry) in map {
                    if let Some(entry) = entry.as_str() {
                        event = event.with_metadata(key.clone(), entry.to_string());
                    }
                }
            }
            Ok(event)
        }
    }
}
