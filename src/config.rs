//! CLI-facing configuration loading (§10.4): an optional TOML file,
//! then command-line flags layered on top as overrides.

use std::path::Path;

use anyhow::{Context, Result};
use popg_pop3::config::Config;

use crate::Cli;

pub fn load(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => read_toml_file(path)?,
        None => Config::default(),
    };

    if let Some(v) = &cli.origin_server {
        config.origin_server = v.clone();
    }
    if let Some(v) = cli.origin_port {
        config.origin_port = v;
    }
    if let Some(v) = &cli.listen_address {
        config.listen_address = v.clone();
    }
    if let Some(v) = cli.port {
        config.port = v;
    }
    if let Some(v) = &cli.management_address {
        config.management_address = v.clone();
    }
    if let Some(v) = cli.management_port {
        config.management_port = v;
    }
    if let Some(v) = &cli.filter_command {
        config.filter_command = Some(v.clone());
        config.et_activated = true;
    }
    if let Some(v) = &cli.error_file {
        config.error_file = v.clone();
    }
    if let Some(v) = &cli.user {
        config.user = v.clone();
    }
    if let Some(v) = &cli.pass {
        config.pass = v.clone();
    }

    Ok(config)
}

fn read_toml_file(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    Config::from_toml_str(&text)
}
