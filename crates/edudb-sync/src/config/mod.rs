//! YAML configuration loading and validation.

mod types;
mod validation;

use std::path::Path;

use tracing::debug;

use crate::error::Result;

pub use types::{CacheConfig, Config, EndpointConfig, SyncConfig};

impl Config {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Config> {
        let config: Config = serde_yaml::from_str(yaml)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        debug!("Loading config from {}", path.display());
        let raw = std::fs::read_to_string(path)?;
        Config::from_yaml(&raw)
    }
}
