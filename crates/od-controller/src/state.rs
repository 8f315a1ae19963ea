//! Controller state

use std::sync::Arc;

use od_agent::tunnel::ProcessManagerFactory;
use od_agent::NodeLauncher;
use od_core::config::{GlobalConfig, JobConfig};
use od_core::CapturedOutputRegistry;

use crate::launcher::{DefaultLaunchers, LocalLauncher};
use crate::report::BuildReporter;
use crate::wrapper::TunnelWrapper;

/// Shared state of a controller process
pub struct ControllerState {
    /// Configuration snapshot handed to every wrapper
    pub global: Arc<GlobalConfig>,
    /// Captured output of running jobs
    pub registry: Arc<CapturedOutputRegistry>,
    /// Launchers for controller and node placements
    pub launchers: Arc<DefaultLaunchers>,
}

impl ControllerState {
    /// Create state running controller-placed tunnels in this process
    pub fn new(global: GlobalConfig) -> Self {
        let factory = ProcessManagerFactory::new(global.binaries.clone(), global.working_dir());
        let node = NodeLauncher::new(Arc::new(factory), global.binaries.binary_dir.clone());
        let local = Arc::new(LocalLauncher::new(Arc::new(node)));
        let agent_token = global.agent_token.clone().unwrap_or_default();
        Self {
            launchers: Arc::new(DefaultLaunchers::new(local, agent_token)),
            global: Arc::new(global),
            registry: Arc::new(CapturedOutputRegistry::new()),
        }
    }

    /// Wrapper for one job configuration
    pub fn wrapper(&self, job: JobConfig, reporter: Arc<dyn BuildReporter>) -> TunnelWrapper {
        let launchers: Arc<DefaultLaunchers> = Arc::clone(&self.launchers);
        TunnelWrapper::new(
            job,
            Arc::clone(&self.global),
            launchers,
            Arc::clone(&self.registry),
            reporter,
        )
    }
}
