//! Configuration validation, run before anything connects.

use crate::error::{Result, SyncError};

use super::types::{Config, EndpointConfig};

const SSL_MODES: &[&str] = &["disable", "require", "verify-ca", "verify-full"];

pub fn validate(config: &Config) -> Result<()> {
    validate_endpoint("source", &config.source)?;
    validate_endpoint("destination", &config.destination)?;

    if config.sync.max_connections == 0 {
        return Err(SyncError::Config(
            "sync.max_connections must be at least 1".to_string(),
        ));
    }
    if config.cache.materials_ttl_secs == 0 {
        return Err(SyncError::Config(
            "cache.materials_ttl_secs must be at least 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_endpoint(which: &str, endpoint: &EndpointConfig) -> Result<()> {
    if endpoint.host.trim().is_empty() {
        return Err(SyncError::Config(format!("{which}.host must not be empty")));
    }
    if endpoint.database.trim().is_empty() {
        return Err(SyncError::Config(format!(
            "{which}.database must not be empty"
        )));
    }
    if endpoint.user.trim().is_empty() {
        return Err(SyncError::Config(format!("{which}.user must not be empty")));
    }
    if !SSL_MODES.contains(&endpoint.ssl_mode.as_str()) {
        return Err(SyncError::Config(format!(
            "{which}.ssl_mode must be one of {}, got '{}'",
            SSL_MODES.join(", "),
            endpoint.ssl_mode
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(host: &str, port: u16, database: &str) -> EndpointConfig {
        EndpointConfig {
            host: host.to_string(),
            port,
            database: database.to_string(),
            user: "app".to_string(),
            password: "secret".to_string(),
            ssl_mode: "require".to_string(),
        }
    }

    fn valid_config() -> Config {
        Config {
            source: endpoint("db.prod.example", 5432, "edudb"),
            destination: endpoint("localhost", 5432, "edudb_dev"),
            sync: Default::default(),
            cache: Default::default(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_empty_host_rejected() {
        let mut config = valid_config();
        config.source.host = "  ".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("source.host"));
    }

    #[test]
    fn test_empty_database_rejected() {
        let mut config = valid_config();
        config.destination.database = String::new();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("destination.database"));
    }

    #[test]
    fn test_unknown_ssl_mode_rejected() {
        let mut config = valid_config();
        config.destination.ssl_mode = "prefer".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("ssl_mode"));
        assert!(err.to_string().contains("prefer"));
    }

    #[test]
    fn test_zero_max_connections_rejected() {
        let mut config = valid_config();
        config.sync.max_connections = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_cache_ttl_rejected() {
        let mut config = valid_config();
        config.cache.materials_ttl_secs = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_same_location_is_still_valid_config() {
        // Export and import against a single database are legal; only the
        // sync path refuses to run against itself.
        let mut config = valid_config();
        config.destination = config.source.clone();
        assert!(validate(&config).is_ok());
        assert!(config.is_self_sync());
    }

    #[test]
    fn test_debug_output_redacts_password() {
        let config = valid_config();
        let debug = format!("{:?}", config);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_is_self_sync_compares_host_port_database() {
        let mut config = valid_config();
        assert!(!config.is_self_sync());

        config.destination = config.source.clone();
        assert!(config.is_self_sync());

        // Same host and database on a different port is a different server.
        config.destination.port = 5433;
        assert!(!config.is_self_sync());
    }
}
