//! Tunnel binary locations and process timing

use od_protocol::TunnelGeneration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;

/// File name of the native tunnel binary
pub const CURRENT_BINARY_NAME: &str = "sc";

/// File name of the Java tunnel archive
pub const LEGACY_ARCHIVE_NAME: &str = "Sauce-Connect.jar";

/// Where tunnel binaries live and how long their processes get
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelBinaries {
    /// Directory holding the extracted binaries
    pub binary_dir: PathBuf,

    /// Java runtime for the legacy generation (resolved from `PATH` if unset)
    pub java_path: Option<PathBuf>,

    /// How long a tunnel may take to report readiness
    #[serde(with = "duration_secs")]
    pub startup_timeout: Duration,

    /// Grace period between SIGTERM and a hard kill
    #[serde(with = "duration_secs")]
    pub shutdown_grace: Duration,
}

impl Default for TunnelBinaries {
    fn default() -> Self {
        Self {
            binary_dir: super::default_config_dir().join("bin"),
            java_path: None,
            startup_timeout: Duration::from_secs(120),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl TunnelBinaries {
    /// File name of the binary for a generation
    pub fn file_name(generation: TunnelGeneration) -> &'static str {
        match generation {
            TunnelGeneration::Current => CURRENT_BINARY_NAME,
            TunnelGeneration::Legacy => LEGACY_ARCHIVE_NAME,
        }
    }

    /// Default location of the binary for a generation
    pub fn binary_path(&self, generation: TunnelGeneration) -> PathBuf {
        self.binary_dir.join(Self::file_name(generation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_paths() {
        let binaries = TunnelBinaries {
            binary_dir: PathBuf::from("/opt/tunnel"),
            ..Default::default()
        };
        assert_eq!(
            binaries.binary_path(TunnelGeneration::Current),
            PathBuf::from("/opt/tunnel/sc")
        );
        assert_eq!(
            binaries.binary_path(TunnelGeneration::Legacy),
            PathBuf::from("/opt/tunnel/Sauce-Connect.jar")
        );
    }
}
