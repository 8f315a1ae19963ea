//! od-core: Core abstractions and configuration for the OnDemand tunnel wrapper
//!
//! This crate provides the shared types, resolution logic and capability
//! traits used by the controller, the node agent and the CLI.

pub mod auth;
pub mod browser;
pub mod capture;
pub mod config;
pub mod credentials;
pub mod environment;
pub mod error;
pub mod job;
pub mod options;
pub mod traits;
pub mod types;

pub use capture::{CapturedOutputRegistry, OutputInterceptor};
pub use credentials::{CredentialResolver, Credentials, Secret};
pub use error::{ConfigError, OdError, TunnelStartError, TunnelStopError};
pub use job::JobContext;
pub use options::TunnelOptions;
pub use types::{JobId, Placement, TunnelState};
