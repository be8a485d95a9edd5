use clap::Parser;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use uptime_monitor::collaborators::Collaborators;
use uptime_monitor::collaborators::broadcaster::ResultBroadcaster;
use uptime_monitor::collaborators::jobs::IntervalJobRegistry;
use uptime_monitor::collaborators::memory::{
    FileMonitorStore, LoggingNotificationBatcher, MemoryHistoryStore, OwnerAndOptInResolver,
};
use uptime_monitor::collaborators::network::GatewayHealthGate;
use uptime_monitor::config::EngineConfig;
use uptime_monitor::{MonitorEngine, VERSION};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "uptime-monitor.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    // Default to `info` if RUST_LOG is not set.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let config = EngineConfig::load(args.config.as_deref())?;
    init_logging(&config.log_dir);
    info!("Starting uptime monitor, version: {}", VERSION);

    let broadcaster = Arc::new(ResultBroadcaster::new(config.broadcast_capacity));
    let collaborators = Collaborators {
        history: Arc::new(MemoryHistoryStore::default()),
        monitors: Arc::new(FileMonitorStore::new(&config.monitors_file)),
        network: Arc::new(GatewayHealthGate::new(
            config.gateway_override,
            config.gateway_probe_timeout(),
        )),
        jobs: Arc::new(IntervalJobRegistry::new()),
        broadcaster: broadcaster.clone(),
        batcher: Arc::new(LoggingNotificationBatcher),
        preferences: Arc::new(OwnerAndOptInResolver),
    };

    // Status updates have no live clients here; mirror them into the log.
    let mut updates_rx = broadcaster.subscribe();
    let updates_task = tokio::spawn(async move {
        loop {
            match updates_rx.recv().await {
                Ok(message) => debug!(message = %message, "Status update."),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Status update listener lagged.");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let engine = MonitorEngine::with_protocol_checker(collaborators, &config)?;
    if let Err(e) = engine.start().await {
        error!(error = %e, "Failed to start monitor engine.");
        return Err(e.into());
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal.");
    }
    info!("Shutdown signal received.");
    engine.stop().await;
    updates_task.abort();
    Ok(())
}
