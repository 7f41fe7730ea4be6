//! Registry service entrypoint.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use fr0g_core::config;
use fr0g_core::error::{exit, PlatformError};
use fr0g_core::http::security::SecurityLayer;
use fr0g_core::shutdown::ShutdownController;

use fr0g_registry::{Catalog, Prober, RegistryHttpServer, RegistryServiceConfig};

#[derive(Debug, Parser)]
#[command(name = "fr0g-registry", about = "fr0g service registry")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let code = match run(args).await {
        Ok(()) => exit::OK,
        Err(PlatformError::Config(msg) | PlatformError::Validation(msg)) => {
            error!(%msg, "invalid configuration");
            exit::CONFIG
        }
        Err(err) => {
            error!(error = %err, "unrecoverable runtime error");
            exit::RUNTIME
        }
    };
    std::process::exit(code);
}

async fn run(args: Args) -> Result<(), PlatformError> {
    let config: RegistryServiceConfig = config::load(args.config.as_deref())?;
    config.validate()?;

    let shutdown = ShutdownController::new();
    let catalog = Arc::new(Catalog::new(config.health.clone()));

    let server = RegistryHttpServer::bind(
        &config.http.bind_addr(),
        Arc::clone(&catalog),
        SecurityLayer::new(config.security.clone()),
    )
    .await?;
    info!(addr = %server.local_addr(), "fr0g-registry starting");

    let prober = Prober::new(Arc::clone(&catalog));
    let probe_task = tokio::spawn(prober.run(shutdown.token()));
    let cleanup_task = tokio::spawn(fr0g_registry::probe::run_cleanup(
        Arc::clone(&catalog),
        Duration::from_secs(config.health.cleanup_interval),
        shutdown.token(),
    ));
    let server_task = tokio::spawn(server.serve(shutdown.token()));

    shutdown.wait_for_signal().await;
    info!("fr0g-registry shutting down");

    let _ = tokio::join!(probe_task, cleanup_task, server_task);
    Ok(())
}
