use thiserror::Error;

use super::Config;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

pub(super) fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.auth.bot_token.trim().is_empty() {
        return Err(ConfigError::InvalidConfig(
            "auth.bot_token cannot be empty".to_string(),
        ));
    }

    if config.database.connection_string().is_empty() {
        return Err(ConfigError::InvalidConfig(
            "database connection string cannot be empty".to_string(),
        ));
    }

    if config.web.port == 0 {
        return Err(ConfigError::InvalidConfig(
            "web.port must be between 1 and 65535".to_string(),
        ));
    }

    let relay = &config.relay;
    if relay.webhook_name.trim().is_empty() {
        return Err(ConfigError::InvalidConfig(
            "relay.webhook_name cannot be empty".to_string(),
        ));
    }

    if relay.command_prefix.is_empty() || relay.mention_prefix.is_empty() {
        return Err(ConfigError::InvalidConfig(
            "relay.command_prefix and relay.mention_prefix cannot be empty".to_string(),
        ));
    }

    if relay.command_prefix == relay.mention_prefix {
        return Err(ConfigError::InvalidConfig(
            "relay.mention_prefix must differ from relay.command_prefix".to_string(),
        ));
    }

    if relay.dedup_capacity == 0 {
        return Err(ConfigError::InvalidConfig(
            "relay.dedup_capacity must be greater than zero".to_string(),
        ));
    }

    if relay.delivery_timeout_secs == 0 {
        return Err(ConfigError::InvalidConfig(
            "relay.delivery_timeout_secs must be greater than zero".to_string(),
        ));
    }

    if relay.lookup_timeout_secs == 0 {
        return Err(ConfigError::InvalidConfig(
            "relay.lookup_timeout_secs must be greater than zero".to_string(),
        ));
    }

    if !matches!(config.logging.format.as_str(), "pretty" | "json" | "compact") {
        return Err(ConfigError::InvalidConfig(format!(
            "logging.format must be one of pretty, json, compact (got {})",
            config.logging.format
        )));
    }

    Ok(())
}
