//! Controller-wide configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::binaries::TunnelBinaries;
use super::serde_utils::duration_secs;

/// Settings shared by every job on a controller
///
/// Loaded once and handed to jobs as an immutable snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Stored account user name
    pub username: String,

    /// Stored account access key
    pub api_key: String,

    /// Prefer the per-user auth cache file over the stored credentials
    pub reuse_auth: bool,

    /// Override for the auth cache location (defaults to `~/.sauce-ondemand`)
    pub auth_cache_path: Option<PathBuf>,

    /// Working directory for tunnels started on the controller (blank = default)
    pub tunnel_directory: String,

    /// Base URL of the REST API
    pub api_url: String,

    /// How long captured output may outlive a job that never tore down
    #[serde(with = "duration_secs")]
    pub capture_retention: Duration,

    /// Token presented to node agents
    pub agent_token: Option<String>,

    /// Tunnel binaries on the controller
    pub binaries: TunnelBinaries,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            api_key: String::new(),
            reuse_auth: false,
            auth_cache_path: None,
            tunnel_directory: String::new(),
            api_url: "https://saucelabs.com/rest/v1".to_string(),
            capture_retention: Duration::from_secs(24 * 60 * 60),
            agent_token: None,
            binaries: TunnelBinaries::default(),
        }
    }
}

impl GlobalConfig {
    /// Working directory for controller-side tunnels, if one is configured
    pub fn working_dir(&self) -> Option<PathBuf> {
        let dir = self.tunnel_directory.trim();
        (!dir.is_empty()).then(|| PathBuf::from(dir))
    }
}
