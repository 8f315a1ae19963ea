//! od-controller: tunnel lifecycle wrapper for CI jobs
//!
//! The controller resolves a job's credentials and options, starts the
//! job's tunnel on the machine the job runs on (itself or an execution node
//! running `od-agent`), publishes connection details into the job's
//! environment and tears everything down after the job.

pub mod cleanup;
pub mod launcher;
pub mod report;
pub mod rest;
pub mod starter;
pub mod state;
pub mod wrapper;

pub use launcher::{DefaultLaunchers, LauncherProvider, LocalLauncher, ProcessLauncher, RemoteLauncher};
pub use report::{BuildReporter, JobReport, LogReporter, RestReporter, SessionCorrelation};
pub use rest::{validate_credentials, RestError, SauceRestClient};
pub use starter::{StartSettings, TunnelCloser, TunnelStarter};
pub use state::ControllerState;
pub use wrapper::{JobEnvironment, TunnelWrapper};
