//! Browser descriptors
//!
//! A selection entry is written `platform|browser|version`, optionally
//! followed by `|device` and `|device-type`. Entries with fewer than three
//! fields or an empty browser name are dropped without error.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Field separator inside a descriptor string
pub const FIELD_SEPARATOR: char = '|';

/// Automation flavor a selection list belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutomationKind {
    Selenium,
    WebDriver,
    Appium,
}

impl AutomationKind {
    /// Every flavor, in the order their variables are emitted
    pub const ALL: [AutomationKind; 3] = [
        AutomationKind::Selenium,
        AutomationKind::WebDriver,
        AutomationKind::Appium,
    ];

    /// Path segment of the REST catalog for this flavor
    pub fn catalog_path(&self) -> &'static str {
        match self {
            AutomationKind::Selenium => "selenium-rc",
            AutomationKind::WebDriver => "webdriver",
            AutomationKind::Appium => "appium",
        }
    }
}

impl fmt::Display for AutomationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutomationKind::Selenium => write!(f, "selenium"),
            AutomationKind::WebDriver => write!(f, "webdriver"),
            AutomationKind::Appium => write!(f, "appium"),
        }
    }
}

impl FromStr for AutomationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "selenium" | "selenium-rc" => Ok(AutomationKind::Selenium),
            "webdriver" => Ok(AutomationKind::WebDriver),
            "appium" => Ok(AutomationKind::Appium),
            other => Err(format!("unknown automation kind '{}'", other)),
        }
    }
}

/// One browser/device a job wants to run against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserDescriptor {
    pub platform: String,
    pub browser: String,
    #[serde(rename = "browser-version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(
        rename = "device-type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub device_type: Option<String>,
}

impl BrowserDescriptor {
    /// Parse a descriptor string; `None` for malformed entries
    pub fn parse(entry: &str) -> Option<Self> {
        let fields: Vec<&str> = entry.split(FIELD_SEPARATOR).map(str::trim).collect();
        if fields.len() < 3 || fields[1].is_empty() {
            return None;
        }

        let optional = |i: usize| {
            fields
                .get(i)
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string())
        };

        Some(Self {
            platform: fields[0].to_string(),
            browser: fields[1].to_string(),
            version: fields[2].to_string(),
            device: optional(3),
            device_type: optional(4),
        })
    }

    /// Parse every entry of a list, dropping malformed ones
    pub fn parse_all<S: AsRef<str>>(entries: &[S]) -> Vec<Self> {
        entries
            .iter()
            .filter_map(|entry| {
                let parsed = Self::parse(entry.as_ref());
                if parsed.is_none() {
                    tracing::debug!("Skipping malformed browser descriptor '{}'", entry.as_ref());
                }
                parsed
            })
            .collect()
    }

    /// Descriptor string form (`platform|browser|version[|device[|device-type]]`)
    pub fn key(&self) -> String {
        let mut key = format!(
            "{}{sep}{}{sep}{}",
            self.platform,
            self.browser,
            self.version,
            sep = FIELD_SEPARATOR
        );
        if let Some(device) = &self.device {
            key.push(FIELD_SEPARATOR);
            key.push_str(device);
            if let Some(device_type) = &self.device_type {
                key.push(FIELD_SEPARATOR);
                key.push_str(device_type);
            }
        }
        key
    }

    /// Driver URI handed to Selenium clients
    pub fn driver_uri(&self, username: &str, access_key: &str) -> String {
        let mut uri = format!(
            "sauce-ondemand:?os={}&browser={}&browser-version={}&username={}&access-key={}",
            self.platform, self.browser, self.version, username, access_key
        );
        if let Some(device) = &self.device {
            uri.push_str("&device=");
            uri.push_str(device);
        }
        if let Some(device_type) = &self.device_type {
            uri.push_str("&device-type=");
            uri.push_str(device_type);
        }
        uri
    }
}

impl fmt::Display for BrowserDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}
