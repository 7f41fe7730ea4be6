//! End-to-end: the review gate parks risky commands and the admin API
//! releases them; validation errors short-circuit before any sender.

use std::sync::Arc;
use std::time::Duration;

use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use tokio::net::TcpListener;

use fr0g_core::config::{QueueConfig, SecurityConfig};
use fr0g_core::http::security::SecurityLayer;
use fr0g_core::ops::OpsServer;
use fr0g_core::shutdown::ShutdownController;
use fr0g_core::types::{ChannelType, OutputAction, OutputCommand};

use fr0g_egress::ops::EgressOps;
use fr0g_egress::senders::{HttpSender, Sender, SenderRegistry};
use fr0g_egress::{Dispatcher, EgressPipeline, ReviewQueue};

async fn start_provider() -> (std::net::SocketAddr, Arc<Mutex<usize>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(Mutex::new(0usize));

    let counter = Arc::clone(&hits);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let io = TokioIo::new(stream);
            let counter = Arc::clone(&counter);
            tokio::spawn(async move {
                let service = service_fn(move |_req| {
                    let counter = Arc::clone(&counter);
                    async move {
                        *counter.lock() += 1;
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
    (addr, hits)
}

fn command(id: &str, target: &str, content: &str) -> OutputCommand {
    OutputCommand::from(OutputAction {
        id: id.to_string(),
        channel: ChannelType::Sms,
        target: target.to_string(),
        content: content.to_string(),
        metadata: Default::default(),
        priority: 0,
    })
}

async fn start_stack() -> (
    Arc<EgressPipeline>,
    std::net::SocketAddr,
    Arc<Mutex<usize>>,
    ShutdownController,
) {
    let controller = ShutdownController::new();
    let (provider_addr, hits) = start_provider().await;

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

    let ops = OpsServer::bind(
        "127.0.0.1:0",
        Arc::new(EgressOps::new(Arc::clone(&pipeline), 2)),
        SecurityLayer::new(SecurityConfig::default()),
    )
    .await
    .unwrap();
    let ops_addr = ops.local_addr();
    tokio::spawn(ops.serve(controller.token()));

    (pipeline, ops_addr, hits, controller)
}

async fn settle(hits: &Arc<Mutex<usize>>, expected: usize) {
    for _ in 0..200 {
        if *hits.lock() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn urgent_command_waits_for_approval_over_the_admin_api() {
    let (pipeline, ops_addr, hits, controller) = start_stack().await;
    let client = reqwest::Client::new();

    pipeline
        .submit(command("c1", "+15551234", "URGENT: reboot now"))
        .await
        .unwrap();

    // Until approved, no sender call occurs.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*hits.lock(), 0);

    let pending: Vec<serde_json::Value> = client
        .get(format!("http://{ops_addr}/review/pending"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["command"]["id"], "c1");
    assert_eq!(pending[0]["command"]["review_status"], "pending");

    let applied = client
        .post(format!("http://{ops_addr}/review/c1"))
        .json(&serde_json::json!({
            "decision": "approve",
            "reviewed_by": "ops",
            "comments": "verified with the on-call",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(applied.status(), 200);

    settle(&hits, 1).await;
    assert_eq!(*hits.lock(), 1);
    assert!(pipeline.results().get("c1").unwrap().success);
    controller.trigger();
}

#[tokio::test]
async fn rejected_command_terminates_without_dispatch() {
    let (pipeline, ops_addr, hits, controller) = start_stack().await;
    let client = reqwest::Client::new();

    pipeline
        .submit(command("c2", "+15551234", "this is an emergency"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let applied = client
        .post(format!("http://{ops_addr}/review/c2"))
        .json(&serde_json::json!({
            "decision": "reject",
            "reviewed_by": "ops",
            "comments": "false positive",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(applied.status(), 200);

    for _ in 0..200 {
        if pipeline.results().get("c2").is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let result = pipeline.results().get("c2").unwrap();
    assert!(!result.success);
    assert_eq!(
        result.error_message.as_deref(),
        Some("rejected: false positive")
    );
    assert_eq!(*hits.lock(), 0);
    controller.trigger();
}

#[tokio::test]
async fn missing_target_short_circuits_validation() {
    let (pipeline, _ops_addr, hits, controller) = start_stack().await;

    pipeline.submit(command("c3", "", "hello")).await.unwrap();

    for _ in 0..200 {
        if pipeline.results().get("c3").is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let result = pipeline.results().get("c3").unwrap();
    assert!(!result.success);
    assert!(result
        .error_message
        .as_deref()
        .unwrap()
        .contains("Target is required"));
    // Neither reviewed nor dispatched.
    assert!(pipeline.review().is_empty());
    assert_eq!(*hits.lock(), 0);
    controller.trigger();
}

#[tokio::test]
async fn unknown_review_id_answers_404() {
    let (_pipeline, ops_addr, _hits, controller) = start_stack().await;

    let response = reqwest::Client::new()
        .post(format!("http://{ops_addr}/review/ghost"))
        .json(&serde_json::json!({"decision": "approve"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    controller.trigger();
}
