//! Tunnel managers backed by local processes

mod factory;
mod process;

pub use factory::ProcessManagerFactory;
pub use process::{ProcessTunnelManager, CURRENT_READY_MARKER, LEGACY_READY_MARKER};
