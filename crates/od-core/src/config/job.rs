//! Per-job tunnel configuration

use od_protocol::TunnelGeneration;
use serde::{Deserialize, Serialize};

use crate::credentials::{Credentials, Secret};

/// Credentials set explicitly on one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCredentials {
    pub username: String,
    pub api_key: String,
}

impl From<&JobCredentials> for Credentials {
    fn from(c: &JobCredentials) -> Self {
        Credentials::new(c.username.clone(), Secret::new(c.api_key.clone()))
    }
}

/// Browser descriptor lists, one per automation flavor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSelections {
    /// Selenium RC descriptors
    pub selenium: Vec<String>,
    /// WebDriver descriptors
    pub webdriver: Vec<String>,
    /// Appium descriptors
    pub appium: Vec<String>,
}

/// How one job wants its tunnel and environment set up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Explicit Selenium host, or `$NAME`/`%NAME` to read the launcher's environment
    pub host: Option<String>,

    /// Explicit Selenium port (same placeholder rule as `host`)
    pub port: String,

    /// Value for `-Dhttps.protocols` on the legacy tunnel
    pub https_protocol: Option<String>,

    /// Extra tunnel options; `${NAME}` is replaced from the job environment
    pub options: String,

    /// Starting URL exported to the job
    pub starting_url: Option<String>,

    /// Start a tunnel at all
    pub enable_tunnel: bool,

    /// Run the tunnel on the job's execution node instead of the controller
    pub launch_on_node: bool,

    /// Use the legacy tunnel generation
    pub use_legacy: bool,

    /// Forward tunnel output to the job log
    pub verbose: bool,

    /// Prefix the options with a generated `--tunnel-identifier`
    pub generate_identifier: bool,

    /// Tunnel binary already present on the execution node
    pub binary_path: Option<String>,

    /// Explicit credentials; win over every other source
    pub credentials: Option<JobCredentials>,

    /// Browser selections
    pub browsers: BrowserSelections,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: String::new(),
            https_protocol: None,
            options: String::new(),
            starting_url: None,
            enable_tunnel: true,
            launch_on_node: false,
            use_legacy: false,
            verbose: false,
            generate_identifier: false,
            binary_path: None,
            credentials: None,
            browsers: BrowserSelections::default(),
        }
    }
}

impl JobConfig {
    /// Tunnel generation selected for this job
    pub fn generation(&self) -> TunnelGeneration {
        TunnelGeneration::from_legacy_flag(self.use_legacy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job_file() {
        let config: JobConfig = toml::from_str(
            r#"
            options = "-v ${BUILD_TAG}"
            launch_on_node = true
            generate_identifier = true

            [credentials]
            username = "ci"
            api_key = "k"

            [browsers]
            webdriver = ["Linux|firefox|45"]
            "#,
        )
        .unwrap();

        assert!(config.enable_tunnel);
        assert!(config.launch_on_node);
        assert_eq!(config.generation(), TunnelGeneration::Current);
        assert_eq!(config.browsers.webdriver, vec!["Linux|firefox|45"]);
        assert_eq!(config.credentials.unwrap().username, "ci");
    }
}
