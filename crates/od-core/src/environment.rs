//! Environment synthesis
//!
//! Builds the variables a job sees once its tunnel is up: where Selenium
//! is reachable, which account to use, and which browsers were selected.

use regex::Regex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::browser::{AutomationKind, BrowserDescriptor};
use crate::config::BrowserSelections;
use crate::credentials::Credentials;
use crate::types::JobId;

pub const SELENIUM_DRIVER: &str = "SELENIUM_DRIVER";
pub const SAUCE_ONDEMAND_BROWSERS: &str = "SAUCE_ONDEMAND_BROWSERS";
pub const SELENIUM_HOST: &str = "SELENIUM_HOST";
pub const SELENIUM_PORT: &str = "SELENIUM_PORT";
pub const SELENIUM_STARTING_URL: &str = "SELENIUM_STARTING_URL";
pub const SAUCE_USER_NAME: &str = "SAUCE_USER_NAME";
pub const SAUCE_API_KEY: &str = "SAUCE_API_KEY";
pub const SELENIUM_PLATFORM: &str = "SELENIUM_PLATFORM";
pub const SELENIUM_BROWSER: &str = "SELENIUM_BROWSER";
pub const SELENIUM_VERSION: &str = "SELENIUM_VERSION";
pub const SELENIUM_DEVICE: &str = "SELENIUM_DEVICE";
pub const SELENIUM_DEVICE_TYPE: &str = "SELENIUM_DEVICE_TYPE";
pub const TUNNEL_IDENTIFIER: &str = "TUNNEL_IDENTIFIER";
pub const JENKINS_BUILD_NUMBER: &str = "JENKINS_BUILD_NUMBER";

/// Keys derived from browser selections; per-axis variables override these
pub const SELECTION_KEYS: [&str; 7] = [
    SELENIUM_DRIVER,
    SAUCE_ONDEMAND_BROWSERS,
    SELENIUM_PLATFORM,
    SELENIUM_BROWSER,
    SELENIUM_VERSION,
    SELENIUM_DEVICE,
    SELENIUM_DEVICE_TYPE,
];

/// Selenium endpoint used when no tunnel runs
pub const PUBLIC_HOST: &str = "ondemand.saucelabs.com";

/// Default port when a tunnel runs
pub const TUNNEL_PORT: u16 = 4445;

/// Default port when talking to the public endpoint
pub const DIRECT_PORT: u16 = 4444;

/// A configured value that names a variable: `$NAME` or `%NAME`
#[allow(clippy::expect_used)]
static ENV_REFERENCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[$%]([A-Za-z_][A-Za-z0-9_]+)$").expect("constant regex pattern is valid")
});

/// Replace every character outside `[A-Za-z0-9]` with `_`
pub fn sanitise_build_number(build: &str) -> String {
    build
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Variable name referenced by a configured value, if it is a reference
fn env_reference(value: &str) -> Option<&str> {
    ENV_REFERENCE_PATTERN
        .captures(value)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// How the Selenium host is chosen
#[derive(Debug, Clone, Default)]
pub struct HostPolicy {
    /// Host set on the job, possibly a `$NAME` reference
    pub configured: Option<String>,
    /// Whether a tunnel is part of the job
    pub tunnel_enabled: bool,
    /// Hostname of the machine running the tunnel
    pub node_hostname: Option<String>,
}

impl HostPolicy {
    /// Resolve against the launcher's own process environment
    pub fn resolve(&self) -> String {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    /// Resolve with an explicit variable lookup
    pub fn resolve_with<F>(&self, lookup: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(configured) = self.configured.as_deref().map(str::trim) {
            if !configured.is_empty() {
                match env_reference(configured) {
                    None => return configured.to_string(),
                    Some(name) => match lookup(name) {
                        Some(value) => return value,
                        None => {
                            tracing::warn!("Host variable {} is not set, using default host", name)
                        }
                    },
                }
            }
        }

        if !self.tunnel_enabled {
            return PUBLIC_HOST.to_string();
        }

        self.node_hostname
            .clone()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    }
}

/// Resolve the Selenium port against the launcher's process environment
pub fn resolve_port(configured: &str, tunnel_enabled: bool) -> u16 {
    resolve_port_with(configured, tunnel_enabled, |name| std::env::var(name).ok())
}

/// Resolve the Selenium port with an explicit variable lookup
///
/// Blank, zero or unparseable values fall back to the default port for the
/// tunnel mode.
pub fn resolve_port_with<F>(configured: &str, tunnel_enabled: bool, lookup: F) -> u16
where
    F: Fn(&str) -> Option<String>,
{
    let configured = configured.trim();
    let value = match env_reference(configured) {
        Some(name) => lookup(name).unwrap_or_default(),
        None => configured.to_string(),
    };

    match value.trim().parse::<u16>() {
        Ok(port) if port != 0 => port,
        _ => {
            if !value.trim().is_empty() {
                tracing::warn!("Ignoring invalid Selenium port '{}'", value);
            }
            if tunnel_enabled {
                TUNNEL_PORT
            } else {
                DIRECT_PORT
            }
        }
    }
}

/// Everything `populate` needs
#[derive(Debug, Clone)]
pub struct EnvironmentInputs<'a> {
    pub job: &'a JobId,
    pub browsers: &'a BrowserSelections,
    pub credentials: &'a Credentials,
    pub host: String,
    pub port: u16,
    pub tunnel_identifier: Option<&'a str>,
    pub starting_url: Option<&'a str>,
    pub build_variables: &'a HashMap<String, String>,
}

/// Write the job's variables into `env`
pub fn populate(env: &mut HashMap<String, String>, inputs: &EnvironmentInputs<'_>) {
    let username = inputs.credentials.username.as_str();
    let access_key = inputs.credentials.access_key.expose();

    for kind in AutomationKind::ALL {
        let entries = match kind {
            AutomationKind::Selenium => &inputs.browsers.selenium,
            AutomationKind::WebDriver => &inputs.browsers.webdriver,
            AutomationKind::Appium => &inputs.browsers.appium,
        };
        let descriptors = BrowserDescriptor::parse_all(entries);
        write_browser_variables(env, &descriptors, username, access_key);
    }

    for key in SELECTION_KEYS {
        if let Some(value) = inputs.build_variables.get(key) {
            env.insert(key.to_string(), value.clone());
        }
    }

    env.insert(
        JENKINS_BUILD_NUMBER.to_string(),
        sanitise_build_number(&inputs.job.to_string()),
    );
    env.insert(SAUCE_USER_NAME.to_string(), username.to_string());
    env.insert(SAUCE_API_KEY.to_string(), access_key.to_string());
    env.insert(SELENIUM_HOST.to_string(), inputs.host.clone());
    env.insert(SELENIUM_PORT.to_string(), inputs.port.to_string());

    if let Some(id) = inputs.tunnel_identifier {
        env.insert(TUNNEL_IDENTIFIER.to_string(), id.to_string());
    }

    if let Some(url) = inputs.starting_url.filter(|u| !u.is_empty()) {
        env.insert(SELENIUM_STARTING_URL.to_string(), url.to_string());
    }
}

fn write_browser_variables(
    env: &mut HashMap<String, String>,
    descriptors: &[BrowserDescriptor],
    username: &str,
    access_key: &str,
) {
    if descriptors.is_empty() {
        return;
    }

    if let [only] = descriptors {
        env.insert(SELENIUM_DRIVER.to_string(), only.driver_uri(username, access_key));
        env.insert(SELENIUM_PLATFORM.to_string(), only.platform.clone());
        env.insert(SELENIUM_BROWSER.to_string(), only.browser.clone());
        env.insert(SELENIUM_VERSION.to_string(), only.version.clone());
        if let Some(device) = &only.device {
            env.insert(SELENIUM_DEVICE.to_string(), device.clone());
        }
        if let Some(device_type) = &only.device_type {
            env.insert(SELENIUM_DEVICE_TYPE.to_string(), device_type.clone());
        }
    }

    let browsers: Vec<serde_json::Value> = descriptors
        .iter()
        .map(|d| {
            let mut entry = json!({
                "os": d.platform,
                "platform": d.platform,
                "browser": d.browser,
                "browser-version": d.version,
                "url": d.driver_uri(username, access_key),
            });
            if let Some(device) = &d.device {
                entry["device"] = json!(device);
            }
            if let Some(device_type) = &d.device_type {
                entry["device-type"] = json!(device_type);
            }
            entry
        })
        .collect();
    env.insert(
        SAUCE_ONDEMAND_BROWSERS.to_string(),
        serde_json::Value::Array(browsers).to_string(),
    );
}
