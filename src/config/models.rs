use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::constants::{circuit, connection};
use crate::delivery::dead_letter::DeadLetterConfig;
use crate::delivery::queue::QueueConfig;
use crate::types::Subscription;

/// The main configuration structure for the relay
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RelayConfig {
    /// Chain node to stream events from
    #[validate]
    pub node: NodeConfig,

    /// Delivery queue tuning
    #[serde(default)]
    pub delivery: QueueConfig,

    /// Per-webhook circuit breaker settings
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Dead-letter retention and cleanup
    #[serde(default)]
    pub dead_letter: DeadLetterConfig,

    /// Subscriptions seeded from configuration at startup. Persisted rows
    /// with the same id are replaced by these on boot.
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

/// Streaming node connection settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NodeConfig {
    /// WebSocket URL of the node (ws:// or wss://)
    #[validate(custom = "validate_ws_url")]
    pub ws_url: String,

    /// Reconnect attempts before giving up
    #[serde(default = "default_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

fn default_reconnect_attempts() -> u32 {
    connection::RECONNECT_MAX_ATTEMPTS
}

/// Circuit breaker settings as they appear in the config file
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    #[validate(range(min = 1))]
    pub failure_threshold: u32,

    #[serde(default = "default_open_timeout_secs")]
    #[validate(range(min = 1))]
    pub open_timeout_secs: u64,
}

fn default_failure_threshold() -> u32 {
    circuit::DEFAULT_FAILURE_THRESHOLD
}

fn default_open_timeout_secs() -> u64 {
    circuit::DEFAULT_OPEN_TIMEOUT_SECS
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            open_timeout_secs: default_open_timeout_secs(),
        }
    }
}

impl From<&CircuitBreakerConfig> for crate::delivery::circuit::CircuitConfig {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            open_timeout: std::time::Duration::from_secs(config.open_timeout_secs),
        }
    }
}

/// Validates that a URL uses a streaming scheme
fn validate_ws_url(url: &str) -> Result<(), ValidationError> {
    match url::Url::parse(url) {
        Ok(parsed) if parsed.scheme() == "ws" || parsed.scheme() == "wss" => Ok(()),
        Ok(_) => Err(ValidationError::new("ws_url_scheme")),
        Err(_) => Err(ValidationError::new("ws_url_invalid")),
    }
}
