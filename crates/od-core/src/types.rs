//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

use crate::error::OdError;

/// Structured identity of one job run
///
/// Used as the key of process-wide maps instead of a formatted string, so
/// changing [`fmt::Display`] can never make two jobs collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId {
    /// Project (job definition) name
    pub project: String,
    /// Run number within the project
    pub number: u64,
}

impl JobId {
    /// Create a new job ID
    pub fn new(project: impl Into<String>, number: u64) -> Self {
        Self {
            project: project.into(),
            number,
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.project, self.number)
    }
}

/// Where a job's tunnel operations execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Placement {
    /// On the controller itself
    Controller,
    /// On an execution node reached through its agent
    Node(SocketAddr),
}

impl Placement {
    /// Whether operations have to cross to another machine
    pub fn is_remote(&self) -> bool {
        matches!(self, Placement::Node(_))
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placement::Controller => write!(f, "controller"),
            Placement::Node(addr) => write!(f, "node {}", addr),
        }
    }
}

/// Lifecycle of one job's tunnel
///
/// ```text
/// Idle -> Starting -> Running -> Stopping -> Closed
///            \-> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TunnelState {
    /// Nothing requested yet
    Idle,
    /// Start in flight
    Starting,
    /// Handle held
    Running,
    /// Close in flight
    Stopping,
    /// Closed after running
    Closed,
    /// Start failed; no handle exists
    Failed,
}

impl TunnelState {
    /// Whether `next` is a legal successor of this state
    pub fn can_advance(&self, next: TunnelState) -> bool {
        use TunnelState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Running)
                | (Starting, Failed)
                | (Running, Stopping)
                | (Stopping, Closed)
        )
    }

    /// Move to `next`, refusing skipped or backward transitions
    pub fn advance(&mut self, next: TunnelState) -> Result<(), OdError> {
        if !self.can_advance(next) {
            return Err(OdError::InvalidTransition {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }

    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, TunnelState::Closed | TunnelState::Failed)
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelState::Idle => write!(f, "idle"),
            TunnelState::Starting => write!(f, "starting"),
            TunnelState::Running => write!(f, "running"),
            TunnelState::Stopping => write!(f, "stopping"),
            TunnelState::Closed => write!(f, "closed"),
            TunnelState::Failed => write!(f, "failed"),
        }
    }
}
