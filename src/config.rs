// src/config.rs

//! Manager configuration
//!
//! ```toml
//! [manager]
//! registry = "/var/lib/crank/registry"
//! workers = 4
//! reconcile_timeout_secs = 60
//! short_wait_secs = 30
//! resync_period_secs = 60
//!
//! [[provider]]
//! name = "aws"
//! package = "registry/provider-aws:v1"
//!
//! [[configuration]]
//! name = "platform"
//! package = "registry/platform:v1"
//! ```

use crate::controller::{
    DEFAULT_RECONCILE_TIMEOUT, DEFAULT_RESYNC_PERIOD, DEFAULT_SHORT_WAIT, Timings,
};
use crate::manager::DEFAULT_WORKERS;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default location of the manager configuration
pub const DEFAULT_CONFIG_PATH: &str = "/etc/crank/crank.toml";

/// Default registry root for the directory unpacker
pub const DEFAULT_REGISTRY: &str = "/var/lib/crank/registry";

/// Errors loading a configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete manager configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerConfig {
    #[serde(rename = "manager", default)]
    pub settings: ManagerSettings,

    /// Providers to install at start-up
    #[serde(rename = "provider", default, skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<PackageDeclaration>,

    /// Configurations to install at start-up
    #[serde(rename = "configuration", default, skip_serializing_if = "Vec::is_empty")]
    pub configurations: Vec<PackageDeclaration>,
}

/// The `[manager]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerSettings {
    /// Root of the directory registry
    #[serde(default = "default_registry")]
    pub registry: PathBuf,

    /// Workers per reconciler
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_reconcile_timeout")]
    pub reconcile_timeout_secs: u64,

    /// Requeue delay after a failed pass
    #[serde(default = "default_short_wait")]
    pub short_wait_secs: u64,

    /// Requeue delay after a successful pass
    #[serde(default = "default_resync_period")]
    pub resync_period_secs: u64,
}

fn default_registry() -> PathBuf {
    PathBuf::from(DEFAULT_REGISTRY)
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_reconcile_timeout() -> u64 {
    DEFAULT_RECONCILE_TIMEOUT.as_secs()
}

fn default_short_wait() -> u64 {
    DEFAULT_SHORT_WAIT.as_secs()
}

fn default_resync_period() -> u64 {
    DEFAULT_RESYNC_PERIOD.as_secs()
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            registry: default_registry(),
            workers: default_workers(),
            reconcile_timeout_secs: default_reconcile_timeout(),
            short_wait_secs: default_short_wait(),
            resync_period_secs: default_resync_period(),
        }
    }
}

/// A package to create when the manager starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDeclaration {
    /// Object name
    pub name: String,
    /// Package reference
    pub package: String,
}

impl ManagerConfig {
    /// Reconciler timings from the `[manager]` section
    pub fn timings(&self) -> Timings {
        Timings {
            reconcile_timeout: Duration::from_secs(self.settings.reconcile_timeout_secs),
            short_wait: Duration::from_secs(self.settings.short_wait_secs),
            resync_period: Duration::from_secs(self.settings.resync_period_secs),
        }
    }

    /// Check values serde cannot
    pub fn validate(&self) -> ConfigResult<()> {
        let settings = &self.settings;
        if settings.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        for (field, value) in [
            ("reconcile_timeout_secs", settings.reconcile_timeout_secs),
            ("short_wait_secs", settings.short_wait_secs),
            ("resync_period_secs", settings.resync_period_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be positive", field)));
            }
        }

        for (kind, declarations) in [
            ("provider", &self.providers),
            ("configuration", &self.configurations),
        ] {
            let mut seen = HashSet::new();
            for decl in declarations {
                if decl.name.is_empty() || decl.package.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "{} entries need both name and package",
                        kind
                    )));
                }
                if !seen.insert(decl.name.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "duplicate {} name: {}",
                        kind, decl.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Serialize the configuration to TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Parse a configuration file
pub fn parse_config_file(path: &Path) -> ConfigResult<ManagerConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config_string(&content)
}

/// Parse a configuration from a TOML string
pub fn parse_config_string(content: &str) -> ConfigResult<ManagerConfig> {
    let config: ManagerConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Load the configuration from `path`, or the default location
///
/// A missing file at the default location yields the defaults; a missing
/// file that was asked for explicitly is an error.
pub fn load_config(path: Option<&Path>) -> ConfigResult<ManagerConfig> {
    match path {
        Some(path) => parse_config_file(path),
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if default.exists() {
                parse_config_file(default)
            } else {
                Ok(ManagerConfig::default())
            }
        }
    }
}
