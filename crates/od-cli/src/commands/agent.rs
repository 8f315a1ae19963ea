//! Agent and ping command implementations

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use od_controller::RemoteLauncher;
use od_core::auth;
use od_core::config::{self, ConfigFile};

use super::resolve_config_path;
use crate::output::{print_info, print_success};

/// Run a node agent until Ctrl-C
pub async fn agent_command(
    config_path: Option<&PathBuf>,
    bind: Option<String>,
    staging: Option<PathBuf>,
) -> Result<()> {
    let path = resolve_config_path(config_path);
    let file: ConfigFile = config::load_config_or_default(&path)
        .with_context(|| format!("Failed to load config file: {:?}", path))?;

    let mut agent = file.agent;
    if let Some(bind) = bind {
        agent.bind_address = bind;
    }
    if let Some(staging) = staging {
        agent.staging_dir = staging;
    }

    print_info(&format!("Agent listening on {}", agent.bind_address));
    if agent.auth_token.is_none() {
        let token_file = agent.token_file.clone().unwrap_or_else(auth::default_token_path);
        print_info(&format!(
            "Controllers need the token in {} as global.agent_token",
            token_file.display()
        ));
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal");
            shutdown.cancel();
        }
    });

    od_agent::run_agent(agent, cancel).await?;
    print_success("Agent stopped");
    Ok(())
}

/// Check that an agent answers on `addr`
///
/// Ping needs no agent token.
pub async fn ping_command(addr: SocketAddr) -> Result<()> {
    let hostname = RemoteLauncher::new(addr, String::new())
        .ping()
        .await
        .with_context(|| format!("Agent at {} is not reachable", addr))?;

    print_success(&format!("Agent at {} is up (host {})", addr, hostname));
    Ok(())
}
