//! Gateway binary: connect to the instrument service, open an experiment,
//! and republish channel readings until interrupted.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rga_gateway::app::Gateway;
use rga_gateway::config::Settings;
use rga_gateway::sink::BroadcastSink;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "rga_gateway", about = "RGA control-service gateway")]
struct Args {
    /// Path to a TOML configuration file (default: config/default.toml).
    #[arg(long)]
    config: Option<String>,

    /// Override the instrument service host.
    #[arg(long)]
    host: Option<String>,

    /// Override the instrument service port.
    #[arg(long)]
    port: Option<u16>,

    /// Experiment file to open (relative to the configured experiment
    /// directory). Omit to adopt the service's current file.
    #[arg(long)]
    experiment: Option<String>,

    /// Start the experiment before acquiring.
    #[arg(long, default_value_t = false)]
    run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("rga_gateway=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let mut settings = Settings::new(args.config.as_deref())?;
    if let Some(host) = args.host {
        settings.instrument.host = host;
    }
    if let Some(port) = args.port {
        settings.instrument.port = port;
    }

    let sink = Arc::new(BroadcastSink::new(1024));
    let mut updates = sink.subscribe();
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(update) => {
                    info!(channel = update.channel, value = update.value, "channel update");
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "update logger lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let gateway = Gateway::new(&settings, sink);
    gateway.initialize().await?;
    gateway.open_experiment(args.experiment.as_deref()).await?;
    if args.run {
        gateway.run_experiment().await?;
    }
    gateway.start_acquisition().await?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    gateway.shutdown().await;
    Ok(())
}
