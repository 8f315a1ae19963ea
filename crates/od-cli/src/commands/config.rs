//! Config command implementations

use std::path::PathBuf;

use anyhow::{Context, Result};

use od_controller::validate_credentials;
use od_core::config::{self, ConfigFile};
use od_core::CredentialResolver;

use super::resolve_config_path;
use crate::output::{print_error, print_info, print_success, print_warning};

fn load(config_path: Option<&PathBuf>) -> Result<ConfigFile> {
    let path = resolve_config_path(config_path);
    config::load_config_or_default(&path)
        .with_context(|| format!("Failed to load config file: {:?}", path))
}

/// Show the configuration path
pub fn config_path(config_path: Option<&PathBuf>) {
    println!("{}", resolve_config_path(config_path).display());
}

/// Show the effective configuration with the access key hidden
pub fn config_show(config_path: Option<&PathBuf>) -> Result<()> {
    let path = resolve_config_path(config_path);
    if !path.exists() {
        print_warning(&format!("No configuration file found at {:?}", path));
        print_info("Run 'ondemand config init' to create one");
        return Ok(());
    }

    let mut file = load(config_path)?;
    if !file.global.api_key.is_empty() {
        file.global.api_key = "****".to_string();
    }
    for token in [&mut file.global.agent_token, &mut file.agent.auth_token] {
        if token.is_some() {
            *token = Some("****".to_string());
        }
    }

    print_info(&format!("Configuration file: {:?}", path));
    println!();
    println!("{}", toml::to_string_pretty(&file)?);
    Ok(())
}

/// Write a default configuration file
pub fn config_init(config_path: Option<&PathBuf>, force: bool) -> Result<()> {
    let path = resolve_config_path(config_path);

    if path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    config::save_config(&path, &ConfigFile::default())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;
    print_success(&format!("Created configuration file: {:?}", path));
    Ok(())
}

/// Check a tunnel working directory (the configured one when `dir` is absent)
pub fn config_check_dir(config_path: Option<&PathBuf>, dir: Option<String>) -> Result<()> {
    let dir = match dir {
        Some(dir) => dir,
        None => load(config_path)?.global.tunnel_directory,
    };

    config::check_working_directory(&dir)?;
    if dir.trim().is_empty() {
        print_success("No working directory configured; tunnels use their default");
    } else {
        print_success(&format!("{} is a writable directory", dir));
    }
    Ok(())
}

/// Check the configured credentials against the REST API
pub async fn config_validate(config_path: Option<&PathBuf>) -> Result<()> {
    let file = load(config_path)?;
    let resolver = CredentialResolver::for_config(&file.global);

    validate_credentials(&file.global, &resolver).await?;
    print_success("Credentials accepted");
    Ok(())
}
