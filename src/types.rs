//! Core data structures for the event relay pipeline

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::filters::FilterMap;

/// A registered interest in one or more contract events, with filters and
/// destination webhooks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subscription {
    /// Unique subscription id
    pub id: String,

    /// Human-readable name
    #[serde(default)]
    pub name: String,

    /// Contract address(es) to watch. A single value is accepted in config
    /// and normalized to a one-element array.
    #[serde(deserialize_with = "one_or_many")]
    pub contract_addresses: Vec<Address>,

    /// Event signature(s) to watch (e.g. "Transfer(address from,address to,uint256 value)")
    #[serde(deserialize_with = "one_or_many")]
    pub event_signatures: Vec<String>,

    /// Filter map applied to every matched event
    #[serde(default)]
    pub filters: FilterMap,

    /// Destination webhooks
    pub webhooks: Vec<WebhookConfig>,
}

impl Subscription {
    /// Validate required fields before the subscription is accepted.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("Subscription id cannot be empty".to_string());
        }
        if self.contract_addresses.is_empty() {
            return Err(format!(
                "Subscription '{}' must have at least one contract address",
                self.id
            ));
        }
        if self.event_signatures.is_empty() {
            return Err(format!(
                "Subscription '{}' must have at least one event signature",
                self.id
            ));
        }
        for signature in &self.event_signatures {
            if !signature.contains('(') || !signature.ends_with(')') {
                return Err(format!(
                    "Invalid event signature '{signature}', expected 'EventName(type1,type2,...)'"
                ));
            }
        }
        for webhook in &self.webhooks {
            let result = crate::delivery::sender::validate_webhook_config(webhook);
            if !result.valid {
                return Err(format!(
                    "Webhook '{}' is invalid: {}",
                    webhook.id,
                    result.errors.join("; ")
                ));
            }
        }
        Ok(())
    }
}

/// Accepts either a single value or an array, always producing an array.
fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        One(T),
        Many(Vec<T>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

/// Normalized representation of one on-chain log entry.
///
/// Immutable once constructed; the contract address is lower-cased so filter
/// comparisons never depend on checksum casing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainEvent {
    pub contract_address: String,
    pub event_name: String,
    pub block_number: u64,
    pub transaction_hash: String,
    pub log_index: u64,
    /// Decoded arguments keyed both by position ("0", "1", ...) and by name
    /// where the signature supplies parameter names.
    pub args: serde_json::Map<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// Destination platform for payload formatting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WebhookFormat {
    Zapier,
    Make,
    N8n,
    Generic,
}

impl Default for WebhookFormat {
    fn default() -> Self {
        Self::Generic
    }
}

impl std::fmt::Display for WebhookFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Zapier => write!(f, "zapier"),
            Self::Make => write!(f, "make"),
            Self::N8n => write!(f, "n8n"),
            Self::Generic => write!(f, "generic"),
        }
    }
}

/// Configuration for a webhook endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookConfig {
    /// Unique webhook id
    pub id: String,

    /// Destination URL, must be absolute http(s)
    pub url: String,

    /// Payload format for the destination platform
    #[serde(default)]
    pub format: WebhookFormat,

    /// Extra HTTP headers sent with every delivery
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum delivery attempts before the delivery is dead-lettered
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

pub(crate) fn default_timeout_ms() -> u64 {
    30_000
}

pub(crate) fn default_retry_attempts() -> u32 {
    3
}

/// Lifecycle state of a webhook delivery.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown delivery status '{other}'")),
        }
    }
}

/// One attempt-tracked unit of work to deliver a formatted payload to one
/// webhook. Mutated only by the delivery queue dispatcher; `Completed` and
/// `Failed` are terminal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub subscription_id: String,
    pub webhook_id: String,
    pub event: ChainEvent,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub max_attempts: u32,
    pub status: DeliveryStatus,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WebhookDelivery {
    /// Builds a fresh pending delivery for one webhook destination.
    pub fn new(
        subscription_id: &str,
        webhook: &WebhookConfig,
        event: ChainEvent,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subscription_id: subscription_id.to_string(),
            webhook_id: webhook.id.clone(),
            event,
            payload,
            attempts: 0,
            max_attempts: webhook.retry_attempts,
            status: DeliveryStatus::Pending,
            next_retry_at: None,
            last_error: None,
            created_at: Utc::now(),
        }
    }
}

/// A delivery that exhausted its retry budget, parked for inspection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    pub subscription_id: String,
    pub webhook_id: String,
    pub event: ChainEvent,
    pub payload: serde_json::Value,
    pub failure_reason: String,
    pub failed_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl DeadLetterEntry {
    /// Parks an exhausted delivery.
    pub fn from_delivery(delivery: &WebhookDelivery, reason: &str, last_error: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            subscription_id: delivery.subscription_id.clone(),
            webhook_id: delivery.webhook_id.clone(),
            event: delivery.event.clone(),
            payload: delivery.payload.clone(),
            failure_reason: reason.to_string(),
            failed_at: Utc::now(),
            attempts: delivery.attempts,
            last_error,
        }
    }

    /// Reconstructs a fresh delivery from this entry with the attempt
    /// counter reset to zero.
    pub fn to_delivery(&self) -> WebhookDelivery {
        WebhookDelivery {
            id: Uuid::new_v4(),
            subscription_id: self.subscription_id.clone(),
            webhook_id: self.webhook_id.clone(),
            event: self.event.clone(),
            payload: self.payload.clone(),
            attempts: 0,
            max_attempts: self.attempts.max(1),
            status: DeliveryStatus::Pending,
            next_retry_at: None,
            last_error: None,
            created_at: Utc::now(),
        }
    }
}
