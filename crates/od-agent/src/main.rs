//! OnDemand node agent daemon
//!
//! Listens for launch requests from the controller and runs tunnel
//! processes on this node.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use od_core::config::{self, AgentConfig, ConfigFile};

#[derive(Parser)]
#[command(name = "od-agent")]
#[command(about = "OnDemand agent - runs tunnels on execution nodes")]
#[command(version)]
struct Args {
    /// Address to listen on (overrides the config file)
    #[arg(short, long)]
    bind: Option<String>,

    /// Directory for staged tunnel binaries
    #[arg(long)]
    staging: Option<PathBuf>,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("OnDemand agent starting...");

    let config_path = args.config.clone().unwrap_or_else(config::default_config_path);
    let mut agent: AgentConfig = match config::load_config_or_default::<ConfigFile>(&config_path) {
        Ok(file) => file.agent,
        Err(e) => {
            tracing::warn!("Failed to load config from {:?}: {}", config_path, e);
            AgentConfig::default()
        }
    };

    if let Some(bind) = args.bind {
        agent.bind_address = bind;
    }
    if let Some(staging) = args.staging {
        agent.staging_dir = staging;
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        tracing::info!("Received shutdown signal");
        shutdown.cancel();
    });

    od_agent::run_agent(agent, cancel).await?;

    tracing::info!("Agent stopped");
    Ok(())
}
