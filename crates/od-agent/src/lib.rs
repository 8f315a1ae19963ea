//! od-agent: tunnel launcher for execution nodes
//!
//! The agent runs on build nodes and starts or stops tunnel processes on
//! behalf of the controller. The controller reaches it over a framed TCP
//! connection, one request per connection.

pub mod launcher;
pub mod server;
pub mod state;
pub mod tunnel;

pub use launcher::NodeLauncher;
pub use server::AgentServer;
pub use state::AgentState;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use od_core::config::AgentConfig;

/// Serve launch requests until `cancel` fires
pub async fn run_agent(config: AgentConfig, cancel: CancellationToken) -> Result<()> {
    let state = AgentState::new(config);
    tracing::info!(
        "Agent on {} staging binaries in {}",
        state.launcher.hostname(),
        state.config.staging_dir.display()
    );

    let token = state
        .config
        .resolve_token()
        .context("Failed to load the agent token")?;
    let server = AgentServer::bind(&state.config.bind_address, state.launcher.clone(), token).await?;
    server.run(cancel).await
}
