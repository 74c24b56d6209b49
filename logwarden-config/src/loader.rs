use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

use crate::models::{Config, RedisConfig};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Load configuration with the precedence defaults ← TOML file ← environment.
///
/// A missing file is not an error when no path was given explicitly; the
/// defaults plus environment are a complete configuration.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw)?
        }
        None => {
            debug!("No config file given, using defaults");
            Config::default()
        }
    };

    apply_env_overrides(&mut config);

    config.validate().map_err(ConfigError::Invalid)?;
    Ok(config)
}

/// Parse configuration from a TOML string. Environment overrides are not
/// applied; this is the seam the tests use.
pub fn load_from_str(raw: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(raw)?;
    config.validate().map_err(ConfigError::Invalid)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(host) = std::env::var("LOGWARDEN_SERVER_HOST") {
        config.server.host = host;
    }
    if let Ok(port) = std::env::var("LOGWARDEN_TCP_PORT") {
        if let Ok(port) = port.parse() {
            config.processor.tcp_port = port;
        }
    }
    if let Ok(url) = std::env::var("LOGWARDEN_REDIS_URL") {
        config.redis = Some(RedisConfig { url });
    }
    if let Ok(url) = std::env::var("LOGWARDEN_DATABASE_URL") {
        config.database.url = Some(url);
    }
    if let Ok(addr) = std::env::var("LOGWARDEN_SERVER_ADDR") {
        config.agent.server_addr = addr;
    }
}
