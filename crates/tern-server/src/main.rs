use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tern_xmpp::ServerContext;
use tracing::{debug, info};

mod settings;
mod telemetry;

/// How often stale sessions are torn down.
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(name = "tern-server", version, about = "Tern XMPP routing core")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the served XMPP domain
    #[arg(long)]
    domain: Option<String>,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    dump_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = settings::load(args.config.as_deref())?;
    if let Some(domain) = args.domain {
        config.server.domain = domain;
    }
    if args.log_json {
        config.logging.json = true;
    }

    if args.dump_config {
        println!(
            "{}",
            toml::to_string_pretty(&config).context("failed to serialize configuration")?
        );
        return Ok(());
    }

    telemetry::init(&config.logging)?;
    info!("Tern server starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let context = Arc::new(
        ServerContext::new(config.server).context("failed to create server context")?,
    );
    if let Some(muc) = context
        .register_muc()
        .await
        .context("failed to register the MUC service")?
    {
        info!(domain = muc.registry().muc_domain(), "MUC service available");
    }

    let mut sweep = tokio::time::interval(SESSION_SWEEP_INTERVAL);
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for shutdown signal")?;
                info!("Shutdown signal received");
                break;
            }
            _ = sweep.tick() => {
                let removed = context.sweep_stale_sessions().await;
                if removed > 0 {
                    debug!(removed, "Swept closed sessions");
                }
            }
        }
    }

    context.shutdown().await;
    info!("Tern server stopped");
    Ok(())
}
