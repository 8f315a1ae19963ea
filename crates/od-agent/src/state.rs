//! Agent state management

use std::sync::Arc;

use od_core::config::AgentConfig;

use crate::launcher::NodeLauncher;
use crate::tunnel::ProcessManagerFactory;

/// Global state for the agent daemon
pub struct AgentState {
    /// Configuration
    pub config: AgentConfig,
    /// Launcher serving controller requests
    pub launcher: Arc<NodeLauncher>,
}

impl AgentState {
    /// Create agent state backed by real tunnel processes
    pub fn new(config: AgentConfig) -> Self {
        let working_dir = config
            .working_dir
            .clone()
            .or_else(|| Some(config.staging_dir.clone()));
        let factory = ProcessManagerFactory::new(config.binaries.clone(), working_dir);
        let launcher = Arc::new(
            NodeLauncher::new(Arc::new(factory), config.staging_dir.clone())
                .with_binary_dir(config.binaries.binary_dir.clone()),
        );
        Self { config, launcher }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launcher_uses_staging_dir() {
        let config = AgentConfig {
            staging_dir: std::env::temp_dir().join("od-agent-state"),
            ..Default::default()
        };
        let state = AgentState::new(config);
        assert_eq!(
            state.launcher.staging_dir(),
            std::env::temp_dir().join("od-agent-state")
        );
        assert!(!state.launcher.hostname().is_empty());
    }
}
