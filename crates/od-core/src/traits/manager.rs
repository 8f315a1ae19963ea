//! Tunnel manager capability

use async_trait::async_trait;
use od_protocol::{StartRequest, TunnelGeneration};
use std::sync::Arc;

use super::sink::SharedSink;
use crate::error::{TunnelStartError, TunnelStopError};

/// What `open` reports about the process backing a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelProcess {
    /// OS process id, if the process is still known
    pub pid: Option<u32>,
    /// Whether an already running process for the same plan was reused
    pub reused: bool,
}

/// One tunnel software generation's manager
///
/// Opening a plan that is already open reuses its process; each open must
/// be balanced by one `close_for_plan`.
#[async_trait]
pub trait TunnelManager: Send + Sync {
    /// Generation this manager drives
    fn generation(&self) -> TunnelGeneration;

    /// Open a tunnel and wait until it reports readiness
    async fn open(
        &self,
        request: &StartRequest,
        sink: SharedSink,
    ) -> Result<TunnelProcess, TunnelStartError>;

    /// Release one reference to the plan (username, options)
    async fn close_for_plan(
        &self,
        username: &str,
        options: &str,
        sink: SharedSink,
    ) -> Result<(), TunnelStopError>;
}

/// Selects the manager for a generation
///
/// Binding happens once per job at setup; the same binder must return a
/// manager that still knows the job's plan at teardown.
pub trait ManagerBinder: Send + Sync {
    /// Manager bound to `generation`
    fn bind(&self, generation: TunnelGeneration) -> Result<Arc<dyn TunnelManager>, TunnelStartError>;

    /// Manager selected by the per-job "use legacy" flag
    fn for_generation(&self, use_legacy: bool) -> Result<Arc<dyn TunnelManager>, TunnelStartError> {
        self.bind(TunnelGeneration::from_legacy_flag(use_legacy))
    }
}
