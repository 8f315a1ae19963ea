//! Capability traits at the seams between the wrapper and its collaborators

mod manager;
mod sink;

pub use manager::{ManagerBinder, TunnelManager, TunnelProcess};
pub use sink::{LogSink, SharedSink, TracingSink};
