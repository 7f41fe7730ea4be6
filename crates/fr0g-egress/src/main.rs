//! Egress service entrypoint.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use fr0g_core::config;
use fr0g_core::error::{exit, PlatformError};
use fr0g_core::http::security::SecurityLayer;
use fr0g_core::ops::OpsServer;
use fr0g_core::registry::RegistryClient;
use fr0g_core::shutdown::ShutdownController;
use fr0g_core::types::{ChannelType, HealthCheckSpec, ServiceRecord};

use fr0g_egress::ops::EgressOps;
use fr0g_egress::rpc::{self, CommandAccept};
use fr0g_egress::senders::{HttpSender, IrcSender, SmtpSender};
use fr0g_egress::{Dispatcher, EgressConfig, EgressPipeline, ReviewQueue, Sender, SenderRegistry};

#[derive(Debug, Parser)]
#[command(name = "fr0g-egress", about = "fr0g egress pipeline")]
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
    let config: EgressConfig = config::load(args.config.as_deref())?;
    config.validate()?;

    let shutdown = ShutdownController::new();
    let registry = Arc::new(RegistryClient::new(config.registry.clone())?);

    let mut senders = SenderRegistry::new();
    senders.register(Arc::new(HttpSender::new(
        "sms",
        ChannelType::Sms,
        config.senders.sms.clone(),
    )));
    senders.register(Arc::new(HttpSender::new(
        "voice",
        ChannelType::Voice,
        config.senders.voice.clone(),
    )));
    senders.register(Arc::new(HttpSender::new(
        "discord",
        ChannelType::Discord,
        config.senders.discord.clone(),
    )));
    senders.register(Arc::new(HttpSender::new(
        "webhook",
        ChannelType::Webhook,
        config.senders.webhook.clone(),
    )));
    senders.register(Arc::new(SmtpSender::new(config.senders.email.clone())));
    senders.register(Arc::new(IrcSender::new(config.senders.irc.clone())));

    for sender in senders.all() {
        if sender.is_enabled() {
            sender.start(shutdown.token()).await?;
        }
    }

    let review = Arc::new(ReviewQueue::new(
        config.review.deadline_seconds.map(Duration::from_secs),
    ));
    let dispatcher = Arc::new(Dispatcher::new(senders));
    let pipeline = Arc::new(EgressPipeline::new(
        &config.queue,
        dispatcher,
        Arc::clone(&review),
    ));
    let workers = pipeline.spawn_workers(config.workers.count, &shutdown.token());
    info!(workers = workers.len(), "egress workers started");

    {
        let review = Arc::clone(&review);
        let tick = Duration::from_secs(config.review.tick_seconds);
        let token = shutdown.token();
        tokio::spawn(async move { review.run_expiry(tick, token).await });
    }

    let rpc_listener = rpc::bind(&config.rpc.bind_addr()).await?;
    let rpc_addr = rpc_listener
        .local_addr()
        .map_err(|e| PlatformError::Fatal(e.to_string()))?;
    let accept = CommandAccept::new(Arc::clone(&pipeline));
    let rpc_task = tokio::spawn(rpc::serve(
        rpc_listener,
        accept,
        config.rpc.enable_reflection,
        shutdown.token(),
    ));

    let ops = OpsServer::bind(
        &config.http.bind_addr(),
        Arc::new(EgressOps::new(Arc::clone(&pipeline), config.workers.count)),
        SecurityLayer::new(config.security.clone()),
    )
    .await?;
    let ops_addr = ops.local_addr();
    let ops_task = tokio::spawn(ops.serve(shutdown.token()));
    info!(ops = %ops_addr, rpc = %rpc_addr, "fr0g-egress started");

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
    info!("fr0g-egress shutting down");
    let _ = tokio::join!(rpc_task, ops_task, heartbeat);
    Ok(())
}

fn service_record(config: &EgressConfig, rpc_port: u16, ops_port: u16) -> ServiceRecord {
    let address = if config.rpc.host == "0.0.0.0" {
        "127.0.0.1".to_string()
    } else {
        config.rpc.host.clone()
    };
    ServiceRecord::new(
        format!("fr0g-egress-{}", uuid::Uuid::new_v4()),
        "fr0g-egress",
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
