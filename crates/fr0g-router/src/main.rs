//! Router service entrypoint.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use fr0g_core::config;
use fr0g_core::error::{exit, PlatformError};
use fr0g_core::http::security::SecurityLayer;
use fr0g_core::ops::OpsServer;
use fr0g_core::registry::RegistryClient;
use fr0g_core::shutdown::ShutdownController;
use fr0g_core::types::{HealthCheckSpec, ServiceRecord};

use fr0g_router::ops::RouterOps;
use fr0g_router::rpc::{self, EventIngest};
use fr0g_router::{AnalyzerBridge, CommandForwarder, EventRouter, RouterConfig};

#[derive(Debug, Parser)]
#[command(name = "fr0g-router", about = "fr0g event router")]
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
    let config: RouterConfig = config::load(args.config.as_deref())?;
    config.validate()?;

    let shutdown = ShutdownController::new();
    let registry = Arc::new(RegistryClient::new(config.registry.clone())?);

    let bridge = Arc::new(AnalyzerBridge::new(
        Arc::clone(&registry),
        config.analyzer.clone(),
    ));
    let egress = Arc::new(CommandForwarder::new(
        Arc::clone(&registry),
        config.egress.clone(),
    ));
    let router = Arc::new(EventRouter::new(
        &config.queue,
        Arc::clone(&bridge) as Arc<dyn fr0g_router::EventAnalyzer>,
        egress as Arc<dyn fr0g_router::CommandSink>,
    ));
    let workers = router.spawn_workers(config.workers.count, &shutdown.token());
    info!(workers = workers.len(), "router workers started");

    let rpc_listener = rpc::bind(&config.rpc.bind_addr()).await?;
    let rpc_addr = rpc_listener
        .local_addr()
        .map_err(|e| PlatformError::Fatal(e.to_string()))?;
    let ingest = EventIngest::new(router.queue(), &config.queue);
    let rpc_task = tokio::spawn(rpc::serve(
        rpc_listener,
        ingest,
        config.rpc.enable_reflection,
        shutdown.token(),
    ));

    let ops = OpsServer::bind(
        &config.http.bind_addr(),
        Arc::new(RouterOps::new(
            Arc::clone(&router),
            Arc::clone(&bridge),
            config.workers.count,
        )),
        SecurityLayer::new(config.security.clone()),
    )
    .await?;
    let ops_addr = ops.local_addr();
    let ops_task = tokio::spawn(ops.serve(shutdown.token()));
    info!(ops = %ops_addr, rpc = %rpc_addr, "fr0g-router started");

    let record = service_record(&config, rpc_addr.port(), ops_addr.port());
    match registry.register(&record).await {
        Ok(()) => info!(id = %record.id, "registered with registry"),
        Err(e) if config.registry.strict => {
            return Err(PlatformError::Fatal(format!(
                "registry unreachable in strict mode: {e}"
            )));
        }
        Err(e) => warn!(error = %e, "initial registration failed; heartbeat will retry"),
    }
    let heartbeat = registry.spawn_heartbeat(record, shutdown.token());

    shutdown.wait_for_signal().await;
    info!("fr0g-router shutting down");
    let _ = tokio::join!(rpc_task, ops_task, heartbeat);
    Ok(())
}

fn service_record(config: &RouterConfig, rpc_port: u16, ops_port: u16) -> ServiceRecord {
    let address = if config.rpc.host == "0.0.0.0" {
        "127.0.0.1".to_string()
    } else {
        config.rpc.host.clone()
    };
    // The advertised port is the RPC port: peers discover the router to
    // submit events, not to scrape it.
    ServiceRecord::new(
        format!("fr0g-router-{}", uuid::Uuid::new_v4()),
        "fr0g-router",
        address.clone(),
        rpc_port,
    )
    .with_check(HealthCheckSpec {
        http: format!("http://{address}:{ops_port}/health"),
        interval: config.registry.check_interval,
        timeout: config.registry.check_timeout,
        deregister_critical_after: None,
    })
}
