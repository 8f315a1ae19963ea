//! Core error types for the tunnel wrapper

use od_protocol::{ProtocolError, TunnelGeneration};
use std::path::PathBuf;
use thiserror::Error;

use crate::types::TunnelState;

/// Top-level error type
#[derive(Error, Debug)]
pub enum OdError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Tunnel start error
    #[error("Tunnel start error: {0}")]
    Start(#[from] TunnelStartError),

    /// Tunnel stop error
    #[error("Tunnel stop error: {0}")]
    Stop(#[from] TunnelStopError),

    /// Lifecycle transition that the state machine does not allow
    #[error("Invalid tunnel state transition: {from} -> {to}")]
    InvalidTransition { from: TunnelState, to: TunnelState },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
///
/// These surface at configuration time and never stop a running job.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Tunnel working directory is unusable
    #[error("Tunnel needs a writable working directory on the controller. '{path}' {reason}")]
    WorkingDirectory { path: String, reason: &'static str },

    /// Credentials could not be resolved or were rejected
    #[error("Credentials error: {0}")]
    Credentials(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Failures that abort a job's setup
#[derive(Error, Debug)]
pub enum TunnelStartError {
    /// No manager could be bound for the generation
    #[error("No {generation} tunnel manager available: {reason}")]
    ManagerUnavailable {
        generation: TunnelGeneration,
        reason: String,
    },

    /// The binary could not be staged on the execution node
    #[error("Failed to stage tunnel binary: {0}")]
    Staging(String),

    /// The tunnel process failed to come up
    #[error("Tunnel process failed: {0}")]
    Process(String),

    /// The channel to the execution node failed
    #[error("Channel to execution node failed: {0}")]
    Channel(#[from] ProtocolError),

    /// The controlling job was interrupted while the start was in flight
    #[error("Tunnel start interrupted")]
    Interrupted,
}

/// Failures while closing a tunnel; only ever logged
#[derive(Error, Debug)]
pub enum TunnelStopError {
    /// No manager could be bound for the generation
    #[error("No {generation} tunnel manager available: {reason}")]
    ManagerUnavailable {
        generation: TunnelGeneration,
        reason: String,
    },

    /// Terminating the tunnel process failed
    #[error("Failed to stop tunnel process: {0}")]
    Process(String),

    /// The channel to the execution node failed
    #[error("Channel to execution node failed: {0}")]
    Channel(#[from] ProtocolError),
}

impl From<TunnelStartError> for TunnelStopError {
    fn from(err: TunnelStartError) -> Self {
        match err {
            TunnelStartError::ManagerUnavailable { generation, reason } => {
                TunnelStopError::ManagerUnavailable { generation, reason }
            }
            TunnelStartError::Channel(e) => TunnelStopError::Channel(e),
            other => TunnelStopError::Process(other.to_string()),
        }
    }
}
