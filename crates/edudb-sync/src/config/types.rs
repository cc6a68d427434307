//! Configuration types deserialized from YAML.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transfer::TransferMode;

/// Top-level configuration: two endpoints plus tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: EndpointConfig,
    pub destination: EndpointConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Config {
    /// True when both endpoints resolve to the same database.
    pub fn is_self_sync(&self) -> bool {
        self.source.location() == self.destination.location()
    }
}

/// One PostgreSQL endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// One of: disable, require, verify-ca, verify-full.
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
}

impl EndpointConfig {
    /// Identity of the endpoint for logs and self-sync comparison.
    pub fn location(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

// Keeps passwords out of debug logs and error chains.
impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Row transfer behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub mode: TransferMode,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            mode: TransferMode::default(),
            max_connections: default_max_connections(),
        }
    }
}

/// Read-cache behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_materials_ttl_secs")]
    pub materials_ttl_secs: u64,
}

impl CacheConfig {
    pub fn materials_ttl(&self) -> Duration {
        Duration::from_secs(self.materials_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            materials_ttl_secs: default_materials_ttl_secs(),
        }
    }
}

fn default_port() -> u16 {
    5432
}

fn default_ssl_mode() -> String {
    "require".to_string()
}

fn default_max_connections() -> usize {
    4
}

fn default_materials_ttl_secs() -> u64 {
    300
}
