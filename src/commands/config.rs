// src/commands/config.rs
//! Print the effective manager configuration

use anyhow::Result;
use crank::load_config;
use std::path::Path;

/// Load the configuration (or its defaults) and print it as TOML
pub fn cmd_config(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    print!("{}", config.to_toml()?);
    Ok(())
}
