//! The router's event-submission RPC surface.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use fr0g_core::config::QueueConfig;
use fr0g_core::queue::{PriorityQueue, QueueMessage};
use fr0g_core::shutdown::ShutdownToken;
use fr0g_core::types::InputEvent;
use fr0g_rpc::v1::event_service_server::{EventService, EventServiceServer};
use fr0g_rpc::{error_to_status, v1};

use fr0g_core::error::PlatformError;

/// `EventService` implementation feeding the input queue.
pub struct EventIngest {
    queue: Arc<PriorityQueue<InputEvent>>,
    enqueue_timeout: std::time::Duration,
    max_retries: u32,
}

impl EventIngest {
    /// Build the ingest surface over the router's queue.
    pub fn new(queue: Arc<PriorityQueue<InputEvent>>, config: &QueueConfig) -> Self {
        Self {
            queue,
            enqueue_timeout: config.enqueue_timeout(),
            max_retries: config.max_retries,
        }
    }
}

#[tonic::async_trait]
impl EventService for EventIngest {
    async fn submit_event(
        &self,
        request: Request<v1::InputEvent>,
    ) -> Result<Response<v1::SubmitEventResponse>, Status> {
        let event = InputEvent::try_from(request.into_inner())
            .map_err(|e| error_to_status(&e))?;
        if event.id.is_empty() {
            return Err(Status::invalid_argument("event id is required"));
        }

        // Priority rides on the envelope for dequeue ordering.
        let priority = event.priority;
        let message = QueueMessage::new(
            event.id.clone(),
            event.channel,
            event.source.clone(),
            String::new(),
            event,
            priority,
            self.max_retries,
        );

        match self.queue.enqueue(message, self.enqueue_timeout).await {
            Ok(()) => Ok(Response::new(v1::SubmitEventResponse {
                accepted: true,
                message: String::new(),
            })),
            Err(_) => Err(error_to_status(&PlatformError::QueueFull)),
        }
    }
}

/// Bind the RPC listener. Failing to bind is fatal for the process.
pub async fn bind(addr: &str) -> Result<tokio::net::TcpListener, PlatformError> {
    tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| PlatformError::Fatal(format!("cannot bind {addr}: {e}")))
}

/// Serve the RPC listener, with reflection when the operator enabled it.
pub async fn serve(
    listener: tokio::net::TcpListener,
    ingest: EventIngest,
    enable_reflection: bool,
    mut shutdown: ShutdownToken,
) -> Result<(), PlatformError> {
    let addr = listener
        .local_addr()
        .map_err(|e| PlatformError::Fatal(e.to_string()))?;
    let mut builder = tonic::transport::Server::builder();
    let mut router = builder.add_service(EventServiceServer::new(ingest));

    if enable_reflection {
        let reflection = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(fr0g_rpc::v1::FILE_DESCRIPTOR_SET)
            .build_v1()
            .map_err(|e| PlatformError::Fatal(format!("reflection service: {e}")))?;
        router = router.add_service(reflection);
    }

    tracing::info!(addr = %addr, reflection = enable_reflection, "event rpc listening");
    let incoming = tokio_stream::wrappers::TcpListenerStream::new(listener);
    router
        .serve_with_incoming_shutdown(incoming, async move { shutdown.cancelled().await })
        .await
        .map_err(|e| PlatformError::Fatal(format!("rpc server on {addr}: {e}")))
}
