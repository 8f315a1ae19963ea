//! Configuration management for the tunnel wrapper
//!
//! Two files are involved: the process-wide `config.toml` holding the
//! `[global]` and `[agent]` sections, and per-job TOML files describing how
//! one job wants its tunnel set up.

mod agent;
mod binaries;
mod global;
mod job;
pub mod serde_utils;

pub use agent::AgentConfig;
pub use binaries::TunnelBinaries;
pub use global::GlobalConfig;
pub use job::{BrowserSelections, JobConfig, JobCredentials};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Contents of the process-wide configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Controller-wide settings
    pub global: GlobalConfig,
    /// Node agent settings
    pub agent: AgentConfig,
}

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ondemand")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Load configuration, falling back to defaults when the file is missing
pub fn load_config_or_default<T>(path: &Path) -> Result<T, ConfigError>
where
    T: serde::de::DeserializeOwned + Default,
{
    match load_config(path) {
        Err(ConfigError::NotFound(_)) => Ok(T::default()),
        other => other,
    }
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

/// Validate the tunnel working directory
///
/// A blank value is fine (the tunnel runs in its default directory).
/// Anything else must be an existing, writable directory.
pub fn check_working_directory(value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Ok(());
    }

    let path = Path::new(value);
    let invalid = |reason| ConfigError::WorkingDirectory {
        path: value.to_string(),
        reason,
    };

    if !path.is_dir() {
        return Err(invalid("is not a directory."));
    }

    let writable = std::fs::metadata(path)
        .map(|m| !m.permissions().readonly())
        .unwrap_or(false);
    if !writable {
        return Err(invalid("is not writable."));
    }

    Ok(())
}
