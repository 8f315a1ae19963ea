//! Browsers command implementation

use std::path::PathBuf;

use anyhow::{Context, Result};

use od_controller::SauceRestClient;
use od_core::browser::AutomationKind;
use od_core::config::{self, ConfigFile};
use od_core::CredentialResolver;

use super::resolve_config_path;
use crate::output::format_browsers;

/// List the browsers the REST API offers for one automation flavor
pub async fn browsers_command(config_path: Option<&PathBuf>, kind: AutomationKind) -> Result<()> {
    let path = resolve_config_path(config_path);
    let file: ConfigFile = config::load_config_or_default(&path)
        .with_context(|| format!("Failed to load config file: {:?}", path))?;

    let credentials = CredentialResolver::for_config(&file.global).resolve(None, &file.global);
    let client = SauceRestClient::new(&file.global.api_url, credentials)?;

    let browsers = client.fetch_browsers(kind).await;
    println!("{}", format_browsers(&browsers));
    Ok(())
}
