//! The egress command-acceptance RPC surface.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use fr0g_core::error::PlatformError;
use fr0g_core::shutdown::ShutdownToken;
use fr0g_core::types::OutputCommand;
use fr0g_rpc::v1::command_service_server::{CommandService, CommandServiceServer};
use fr0g_rpc::{error_to_status, v1};

use crate::pipeline::EgressPipeline;

/// `CommandService` implementation feeding the output queue.
pub struct CommandAccept {
    pipeline: Arc<EgressPipeline>,
}

impl CommandAccept {
    /// Build the acceptance surface over the pipeline.
    pub fn new(pipeline: Arc<EgressPipeline>) -> Self {
        Self { pipeline }
    }
}

#[tonic::async_trait]
impl CommandService for CommandAccept {
    async fn submit_command(
        &self,
        request: Request<v1::OutputCommand>,
    ) -> Result<Response<v1::SubmitCommandResponse>, Status> {
        let command = OutputCommand::try_from(request.into_inner())
            .map_err(|e| error_to_status(&e))?;
        if command.id.is_empty() {
            return Err(Status::invalid_argument("command id is required"));
        }

        match self.pipeline.submit(command).await {
            Ok(()) => Ok(Response::new(v1::SubmitCommandResponse {
                accepted: true,
                message: String::new(),
            })),
            Err(err) => Err(error_to_status(&err)),
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
    accept: CommandAccept,
    enable_reflection: bool,
    mut shutdown: ShutdownToken,
) -> Result<(), PlatformError> {
    let addr = listener
        .local_addr()
        .map_err(|e| PlatformError::Fatal(e.to_string()))?;
    let mut builder = tonic::transport::Server::builder();
    let mut router = builder.add_service(CommandServiceServer::new(accept));

    if enable_reflection {
        let reflection = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(fr0g_rpc::v1::FILE_DESCRIPTOR_SET)
            .build_v1()
            .map_err(|e| PlatformError::Fatal(format!("reflection service: {e}")))?;
        router = router.add_service(reflection);
    }

    tracing::info!(addr = %addr, reflection = enable_reflection, "command rpc listening");
    let incoming = tokio_stream::wrappers::TcpListenerStream::new(listener);
    router
        .serve_with_incoming_shutdown(incoming, async move { shutdown.cancelled().await })
        .await
        .map_err(|e| PlatformError::Fatal(format!("rpc server on {addr}: {e}")))
}
