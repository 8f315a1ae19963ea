//! Tunnel launch types shared by the controller and the node agent
//!
//! A start is described by a single [`StartRequest`] value so that it can
//! cross the channel to another machine unchanged. The node answers with a
//! [`TunnelHandle`], which is everything a later stop needs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which tunnel manager implementation backs a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelGeneration {
    /// Java based tunnel (`Sauce-Connect.jar`)
    Legacy,
    /// Native tunnel binary (`sc`)
    Current,
}

impl TunnelGeneration {
    /// Pick the generation from the per-job "use legacy tunnel" flag
    pub fn from_legacy_flag(use_legacy: bool) -> Self {
        if use_legacy {
            Self::Legacy
        } else {
            Self::Current
        }
    }

    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Current => "current",
        }
    }
}

impl fmt::Display for TunnelGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to open a tunnel
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    /// Manager generation to bind
    pub generation: TunnelGeneration,
    /// Account user name
    pub username: String,
    /// Account access key
    pub access_key: String,
    /// Local port the tunnel listens on
    pub port: u16,
    /// Explicit tunnel binary location, if already known on the target node
    pub binary_path: Option<String>,
    /// Fully resolved option string
    pub options: String,
    /// Value for `-Dhttps.protocols` (legacy generation only)
    pub https_protocol: Option<String>,
    /// Forward tunnel process output to the job log
    pub verbose: bool,
}

impl fmt::Debug for StartRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartRequest")
            .field("generation", &self.generation)
            .field("username", &self.username)
            .field("access_key", &"<redacted>")
            .field("port", &self.port)
            .field("binary_path", &self.binary_path)
            .field("options", &self.options)
            .field("https_protocol", &self.https_protocol)
            .field("verbose", &self.verbose)
            .finish()
    }
}

/// Opaque record of an open tunnel
///
/// Stopping only needs the generation and the plan key (user name plus
/// options) the tunnel was opened under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelHandle {
    /// Generation the tunnel was opened with
    pub generation: TunnelGeneration,
    /// User name the plan is registered under
    pub username: String,
    /// Options string the plan is registered under
    pub options: String,
    /// Hostname of the machine running the tunnel process
    pub hostname: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_from_flag() {
        assert_eq!(TunnelGeneration::from_legacy_flag(true), TunnelGeneration::Legacy);
        assert_eq!(TunnelGeneration::from_legacy_flag(false), TunnelGeneration::Current);
    }

    #[test]
    fn test_start_request_debug_hides_key() {
        let request = StartRequest {
            generation: TunnelGeneration::Current,
            username: "alice".to_string(),
            access_key: "s3cr3t".to_string(),
            port: 4445,
            binary_path: None,
            options: String::new(),
            https_protocol: None,
            verbose: false,
        };

        let debug = format!("{:?}", request);
        assert!(debug.contains("alice"));
        assert!(!debug.contains("s3cr3t"));
    }
}
