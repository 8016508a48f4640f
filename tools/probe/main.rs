//! Connectivity probe for the instrument service.
//!
//! Connects, reports the service's current experiment file, and optionally
//! fetches the column legend. Useful when bringing up a new deployment
//! before pointing the gateway at it.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rga_gateway::client::{InstrumentClient, SessionRole};
use rga_gateway::config::Settings;

#[derive(Parser, Debug)]
#[command(name = "probe", about = "Probe an RGA control service")]
struct Args {
    /// Instrument service host.
    host: String,

    /// Instrument service port.
    #[arg(default_value_t = 5026)]
    port: u16,

    /// Also fetch the column legend of this view.
    #[arg(long)]
    legend: Option<u32>,

    /// Give up on the legend after this many attempts.
    #[arg(long, default_value_t = 10)]
    legend_attempts: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut settings = Settings::for_endpoint(&args.host, args.port);
    settings.acquisition.legend_max_attempts = Some(args.legend_attempts);

    let client = InstrumentClient::new(&settings);
    client.initialize().await?;
    println!("connected to {}:{}", args.host, args.port);

    let filename = client.query_filename(SessionRole::Command).await?;
    println!("current file: {filename}");

    if let Some(view) = args.legend {
        let (legend, path) = client.get_legends(view).await?;
        println!("legend for {path}:");
        for entry in legend.entries() {
            println!("  {entry}");
        }
        println!("mass channels: {:?}", legend.mass_values());
    }

    client.shutdown().await;
    Ok(())
}
