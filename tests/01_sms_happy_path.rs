//! End-to-end: an SMS webhook becomes exactly one outbound provider call.
//!
//! Wires the real pieces in-process: webhook adapter -> input queue ->
//! router workers -> scripted analyzer -> egress pipeline -> HTTP sender
//! -> a stub SMS provider that records what it was asked to send.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use http_body_util::BodyExt;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use tokio::net::TcpListener;

use fr0g_core::config::QueueConfig;
use fr0g_core::error::PlatformError;
use fr0g_core::queue::{PriorityQueue, QueueMessage};
use fr0g_core::shutdown::ShutdownController;
use fr0g_core::types::{
    AnalysisResult, ChannelType, InputEvent, OutputAction, OutputCommand,
};

use fr0g_egress::senders::{HttpSender, Sender, SenderRegistry};
use fr0g_egress::{Dispatcher, EgressPipeline, ReviewQueue};
use fr0g_ingress::config::WebhookAdapterConfig;
use fr0g_ingress::webhook::WebhookAdapter;
use fr0g_ingress::{ChannelAdapter, EventSink};
use fr0g_router::{CommandSink, EventAnalyzer, EventRouter};

/// Records every JSON body the "provider" receives.
async fn start_provider() -> (std::net::SocketAddr, Arc<Mutex<Vec<serde_json::Value>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));

    let captured = Arc::clone(&seen);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let io = TokioIo::new(stream);
            let captured = Arc::clone(&captured);
            tokio::spawn(async move {
                let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                    let captured = Arc::clone(&captured);
                    async move {
                        let bytes = req.into_body().collect().await.unwrap().to_bytes();
                        if let Ok(value) = serde_json::from_slice(&bytes) {
                            captured.lock().push(value);
                        }
                        Ok::<_, std::convert::Infallible>(
                            hyper::Response::new(String::from("{}")),
                        )
                    }
                });
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(io, service)
                    .await;
            });
        }
    });
    (addr, seen)
}

/// Bridges the ingress sink onto a router input queue.
struct QueueSink {
    queue: Arc<PriorityQueue<InputEvent>>,
}

#[async_trait]
impl EventSink for QueueSink {
    async fn submit(&self, event: InputEvent) -> Result<(), PlatformError> {
        let priority = event.priority;
        let message = QueueMessage::new(
            event.id.clone(),
            event.channel,
            event.source.clone(),
            String::new(),
            event,
            priority,
            3,
        );
        self.queue
            .try_enqueue(message)
            .map_err(|_| PlatformError::QueueFull)
    }
}

/// Answers every SMS with an auto-reply to the sender.
struct AutoReplyAnalyzer;

#[async_trait]
impl EventAnalyzer for AutoReplyAnalyzer {
    async fn analyze(&self, event: &InputEvent) -> Result<AnalysisResult, PlatformError> {
        Ok(AnalysisResult {
            event_id: event.id.clone(),
            processed: true,
            actions: vec![OutputAction {
                id: String::new(),
                channel: ChannelType::Sms,
                target: event.source.clone(),
                content: format!("Auto-reply: {}", event.content),
                metadata: Default::default(),
                priority: 0,
            }],
            metadata: Default::default(),
            processed_at: Utc::now(),
        })
    }
}

/// Bridges the router's command hand-off onto an in-process pipeline.
struct PipelineSink {
    pipeline: Arc<EgressPipeline>,
}

#[async_trait]
impl CommandSink for PipelineSink {
    async fn submit(&self, command: OutputCommand) -> Result<(), PlatformError> {
        self.pipeline.submit(command).await
    }
}

#[tokio::test]
async fn sms_webhook_round_trips_to_one_provider_send() {
    let controller = ShutdownController::new();
    let (provider_addr, provider_seen) = start_provider().await;

    // Egress: a real HTTP sender pointed at the stub provider.
    let mut senders = SenderRegistry::new();
    senders.register(Arc::new(HttpSender::new(
        "sms",
        ChannelType::Sms,
        fr0g_egress::config::HttpSenderConfig {
            enabled: true,
            endpoint: Some(format!("http://{provider_addr}/send")),
            api_key: None,
        },
    )) as Arc<dyn Sender>);
    let pipeline = Arc::new(EgressPipeline::new(
        &QueueConfig {
            capacity: 32,
            enqueue_timeout_ms: 200,
            ..QueueConfig::default()
        },
        Arc::new(Dispatcher::new(senders)),
        Arc::new(ReviewQueue::new(None)),
    ));
    pipeline.spawn_workers(2, &controller.token());

    // Router: scripted analyzer, commands handed straight to the pipeline.
    let router = Arc::new(EventRouter::new(
        &QueueConfig {
            capacity: 32,
            enqueue_timeout_ms: 200,
            ..QueueConfig::default()
        },
        Arc::new(AutoReplyAnalyzer),
        Arc::new(PipelineSink {
            pipeline: Arc::clone(&pipeline),
        }),
    ));
    router.spawn_workers(2, &controller.token());

    // Ingress: a real webhook adapter feeding the router's queue.
    let adapter = WebhookAdapter::sms(
        WebhookAdapterConfig {
            enabled: true,
            port: 0,
            signing_secret: None,
        },
        Arc::new(QueueSink {
            queue: router.queue(),
        }),
    );
    adapter.start(controller.token()).await.unwrap();
    let webhook_addr = adapter.local_addr().unwrap();

    let response = reqwest::Client::new()
        .post(format!("http://{webhook_addr}/webhook/sms"))
        .json(&serde_json::json!({"from": "+15551234", "body": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);

    // Exactly one outbound SMS with the auto-reply body.
    for _ in 0..200 {
        if !provider_seen.lock().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let seen = provider_seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["target"], "+15551234");
    assert_eq!(seen[0]["content"], "Auto-reply: hi");
    drop(seen);

    assert_eq!(router.stats().processed, 1);
    assert_eq!(adapter.stats().events, 1);
    controller.trigger();
}
