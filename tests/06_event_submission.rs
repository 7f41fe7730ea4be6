//! End-to-end: event submission over the router's RPC, including the
//! backpressure answer when the input queue is full.

use std::sync::Arc;
use std::time::Duration;

use fr0g_core::config::QueueConfig;
use fr0g_core::queue::PriorityQueue;
use fr0g_core::shutdown::ShutdownController;
use fr0g_core::types::InputEvent;

use fr0g_router::rpc::{self, EventIngest};
use fr0g_rpc::v1;
use fr0g_rpc::v1::event_service_client::EventServiceClient;

async fn start_rpc(
    capacity: usize,
) -> (
    std::net::SocketAddr,
    Arc<PriorityQueue<InputEvent>>,
    ShutdownController,
) {
    let controller = ShutdownController::new();
    let queue = Arc::new(PriorityQueue::new(capacity));
    let config = QueueConfig {
        capacity,
        enqueue_timeout_ms: 50,
        ..QueueConfig::default()
    };

    let listener = rpc::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(rpc::serve(
        listener,
        EventIngest::new(Arc::clone(&queue), &config),
        false,
        controller.token(),
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, queue, controller)
}

fn wire_event(id: &str, priority: u32) -> v1::InputEvent {
    v1::InputEvent {
        id: id.to_string(),
        r#type: "irc".to_string(),
        source: "alice!a@host".to_string(),
        content: "hello".to_string(),
        priority,
        ..Default::default()
    }
}

#[tokio::test]
async fn submitted_events_land_on_the_queue_in_priority_order() {
    let (addr, queue, controller) = start_rpc(16).await;
    let mut client = EventServiceClient::connect(format!("http://{addr}"))
        .await
        .unwrap();

    for (id, priority) in [("low", 1), ("high", 9), ("mid", 5)] {
        let response = client
            .submit_event(tonic::Request::new(wire_event(id, priority)))
            .await
            .unwrap();
        assert!(response.into_inner().accepted);
    }

    assert_eq!(queue.dequeue().await.id, "high");
    assert_eq!(queue.dequeue().await.id, "mid");
    assert_eq!(queue.dequeue().await.id, "low");
    controller.trigger();
}

#[tokio::test]
async fn full_queue_answers_resource_exhausted() {
    let (addr, _queue, controller) = start_rpc(1).await;
    let mut client = EventServiceClient::connect(format!("http://{addr}"))
        .await
        .unwrap();

    client
        .submit_event(tonic::Request::new(wire_event("e1", 0)))
        .await
        .unwrap();

    let status = client
        .submit_event(tonic::Request::new(wire_event("e2", 0)))
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::ResourceExhausted);
    controller.trigger();
}
