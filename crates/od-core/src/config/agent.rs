//! Node agent configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::binaries::TunnelBinaries;
use crate::auth;

/// Configuration for an execution-node agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Address the agent listens on for launch requests
    pub bind_address: String,

    /// Directory receiving binaries staged by the controller
    pub staging_dir: PathBuf,

    /// Working directory for tunnel processes (None = staging directory)
    pub working_dir: Option<PathBuf>,

    /// Token controllers must present (None = read or generate `token_file`)
    pub auth_token: Option<String>,

    /// Token file used when no token is configured (None = default path)
    pub token_file: Option<PathBuf>,

    /// Tunnel binaries already present on this node
    pub binaries: TunnelBinaries,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:7445".to_string(),
            staging_dir: dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("ondemand")
                .join("staging"),
            working_dir: None,
            auth_token: None,
            token_file: None,
            binaries: TunnelBinaries::default(),
        }
    }
}

impl AgentConfig {
    /// Token this agent requires, generating a token file when none is configured
    pub fn resolve_token(&self) -> std::io::Result<String> {
        match self.auth_token.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            Some(token) => Ok(token.to_string()),
            None => {
                let path = self.token_file.clone().unwrap_or_else(auth::default_token_path);
                auth::load_or_create_token(&path)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_token_wins() {
        let config = AgentConfig {
            auth_token: Some(" s3cret ".to_string()),
            token_file: Some(PathBuf::from("/nonexistent/agent_token")),
            ..Default::default()
        };
        assert_eq!(config.resolve_token().unwrap(), "s3cret");
    }

    #[test]
    fn test_token_file_is_generated_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig {
            token_file: Some(dir.path().join("agent_token")),
            ..Default::default()
        };

        let token = config.resolve_token().unwrap();
        assert_eq!(token.len(), 64);
        assert_eq!(config.resolve_token().unwrap(), token);
    }

    #[test]
    fn test_parse_token_settings() {
        let config: AgentConfig = toml::from_str(
            "bind_address = \"0.0.0.0:7445\"\nauth_token = \"abc\"\n\n[binaries]\nbinary_dir = \"/opt/sc\"\n",
        )
        .unwrap();
        assert_eq!(config.auth_token.as_deref(), Some("abc"));
        assert_eq!(config.binaries.binary_dir, PathBuf::from("/opt/sc"));
    }
}
