//! Ingress service entrypoint.

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

use fr0g_ingress::adapter::ChannelAdapter;
use fr0g_ingress::esmtp::EsmtpAdapter;
use fr0g_ingress::irc::IrcAdapter;
use fr0g_ingress::ops::IngressOps;
use fr0g_ingress::webhook::WebhookAdapter;
use fr0g_ingress::{forwarder, EventSink, IngressConfig};

#[derive(Debug, Parser)]
#[command(name = "fr0g-ingress", about = "fr0g channel ingress adapters")]
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
    let config: IngressConfig = config::load(args.config.as_deref())?;
    config.validate()?;

    let shutdown = ShutdownController::new();
    let registry = Arc::new(RegistryClient::new(config.registry.clone())?);
    let (sink, forwarder_task) = forwarder::spawn(
        Arc::clone(&registry),
        config.router.clone(),
        shutdown.token(),
    );
    let sink: Arc<dyn EventSink> = sink;

    let mut adapters: Vec<Arc<dyn ChannelAdapter>> = Vec::new();
    if config.adapters.sms.enabled {
        adapters.push(Arc::new(WebhookAdapter::sms(
            config.adapters.sms.clone(),
            Arc::clone(&sink),
        )));
    }
    if config.adapters.voice.enabled {
        adapters.push(Arc::new(WebhookAdapter::voice(
            config.adapters.voice.clone(),
            Arc::clone(&sink),
        )));
    }
    if config.adapters.discord.enabled {
        adapters.push(Arc::new(WebhookAdapter::discord(
            config.adapters.discord.clone(),
            Arc::clone(&sink),
        )));
    }
    if config.adapters.webhook.enabled {
        adapters.push(Arc::new(WebhookAdapter::generic(
            config.adapters.webhook.clone(),
            Arc::clone(&sink),
        )));
    }
    if config.adapters.irc.enabled {
        adapters.push(Arc::new(IrcAdapter::new(
            config.adapters.irc.clone(),
            Arc::clone(&sink),
        )));
    }
    if config.adapters.esmtp.enabled {
        adapters.push(Arc::new(EsmtpAdapter::new(
            config.adapters.esmtp.clone(),
            Arc::clone(&sink),
        )));
    }

    for adapter in &adapters {
        adapter.start(shutdown.token()).await?;
        info!(adapter = adapter.name(), "adapter started");
    }

    let ops = OpsServer::bind(
        &config.http.bind_addr(),
        Arc::new(IngressOps::new(adapters.clone())),
        SecurityLayer::new(config.security.clone()),
    )
    .await?;
    let ops_addr = ops.local_addr();
    let ops_task = tokio::spawn(ops.serve(shutdown.token()));
    info!(addr = %ops_addr, "fr0g-ingress started");

    let record = service_record(&config, ops_addr.port());
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
    info!("fr0g-ingress shutting down");
    for adapter in &adapters {
        adapter.stop();
    }
    let _ = tokio::join!(forwarder_task, ops_task, heartbeat);
    Ok(())
}

fn service_record(config: &IngressConfig, ops_port: u16) -> ServiceRecord {
    let address = if config.http.host == "0.0.0.0" {
        "127.0.0.1".to_string()
    } else {
        config.http.host.clone()
    };
    ServiceRecord::new(
        format!("fr0g-ingress-{}", uuid::Uuid::new_v4()),
        "fr0g-ingress",
        address.clone(),
        ops_port,
    )
    .with_check(HealthCheckSpec {
        http: format!("http://{address}:{ops_port}/health"),
        interval: config.registry.check_interval,
        timeout: config.registry.check_timeout,
        deregister_critical_after: None,
    })
}
