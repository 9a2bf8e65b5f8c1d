use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

mod config;
mod device;
mod discovery;
mod errors;
mod fleet;
mod proxy;
mod registry;
mod soap;
mod templates;
mod wsse;

use config::Config;
use fleet::Fleet;

/// Virtual ONVIF camera fleet in front of a multichannel recorder.
#[derive(Parser, Debug)]
#[command(name = "virtual-onvif-server", version, about)]
struct Args {
    /// Path to the fleet configuration file (YAML or JSON).
    config: String,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,

    /// Do not answer WS-Discovery probes.
    #[arg(long)]
    no_discovery: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        "virtual_onvif_server=debug,info"
    } else {
        "virtual_onvif_server=info,warn"
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Could not load {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    if config.onvif.is_empty() {
        error!("No cameras configured in {}", args.config);
        std::process::exit(1);
    }
    info!(
        cameras = config.onvif.len(),
        "Starting virtual ONVIF server"
    );

    let (fleet, summary) = Fleet::start(config, !args.no_discovery).await?;
    if summary.started == 0 {
        error!("All cameras failed to start");
        fleet.shutdown().await;
        std::process::exit(1);
    }

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    fleet.shutdown().await;
    Ok(())
}
