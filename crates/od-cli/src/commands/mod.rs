//! CLI command implementations

mod agent;
mod browsers;
mod config;
mod run;

pub use agent::{agent_command, ping_command};
pub use browsers::browsers_command;
pub use config::{config_check_dir, config_init, config_path, config_show, config_validate};
pub use run::{parse_axis, run_command, RunArgs};

use std::path::PathBuf;

use od_core::config as od_config;

/// Configuration file in effect: the `--config` flag or the default location
pub(crate) fn resolve_config_path(config_path: Option<&PathBuf>) -> PathBuf {
    config_path
        .cloned()
        .unwrap_or_else(od_config::default_config_path)
}
