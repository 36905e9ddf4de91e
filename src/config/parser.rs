use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;
use validator::Validate;

use super::models::RelayConfig;

/// Errors that can occur during configuration parsing
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to open config file: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Configuration validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Configuration error: {0}")]
    Other(String),
}

/// Provides default configuration file path
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .expect("Could not determine home directory")
        .join(".chainrelay")
        .join("config.yaml")
}

/// Loads and validates the relay configuration
pub fn load_config<P: AsRef<Path>>(config_path: P) -> Result<RelayConfig, ConfigError> {
    let mut file = File::open(&config_path).map_err(ConfigError::FileError)?;

    let mut content = String::new();
    file.read_to_string(&mut content)
        .map_err(ConfigError::FileError)?;

    let config: RelayConfig = serde_yaml::from_str(&content).map_err(ConfigError::ParseError)?;

    config.validate().map_err(ConfigError::ValidationError)?;

    // Cross-field checks serde cannot express
    let mut seen_subscriptions = HashSet::new();
    let mut seen_webhooks = HashSet::new();
    for subscription in &config.subscriptions {
        if let Err(reason) = subscription.validate() {
            return Err(ConfigError::Other(reason));
        }
        if let Err(errors) = crate::filters::validate_filters(&subscription.filters) {
            return Err(ConfigError::Other(format!(
                "Subscription '{}' has invalid filters: {}",
                subscription.id,
                errors.join("; ")
            )));
        }
        if !seen_subscriptions.insert(subscription.id.clone()) {
            return Err(ConfigError::Other(format!(
                "Duplicate subscription id '{}'",
                subscription.id
            )));
        }
        for webhook in &subscription.webhooks {
            if !seen_webhooks.insert(webhook.id.clone()) {
                return Err(ConfigError::Other(format!(
                    "Duplicate webhook id '{}'",
                    webhook.id
                )));
            }
        }
    }

    Ok(config)
}
