//! Row types for the relay schema
//!
//! JSON columns are parsed lazily into domain types; a row with unparsable
//! JSON yields an error the repositories log and skip instead of failing a
//! whole load.

use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::types::{
    ChainEvent, DeadLetterEntry, DeliveryStatus, Subscription, WebhookConfig, WebhookDelivery,
    WebhookFormat,
};

#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRow {
    pub id: String,
    pub name: String,
    pub contract_addresses: serde_json::Value,
    pub event_signatures: serde_json::Value,
    pub filters: serde_json::Value,
    pub active: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct WebhookRow {
    pub id: String,
    pub subscription_id: String,
    pub url: String,
    pub format: String,
    pub headers: serde_json::Value,
    pub timeout_ms: i64,
    pub retry_attempts: i32,
    pub active: bool,
}

impl SubscriptionRow {
    /// Rebuilds the domain subscription from this row plus its webhooks.
    pub fn into_subscription(self, webhooks: Vec<WebhookRow>) -> Result<Subscription> {
        let contract_addresses = serde_json::from_value(self.contract_addresses)
            .with_context(|| format!("Bad contract_addresses JSON for subscription '{}'", self.id))?;
        let event_signatures = serde_json::from_value(self.event_signatures)
            .with_context(|| format!("Bad event_signatures JSON for subscription '{}'", self.id))?;
        let filters = serde_json::from_value(self.filters)
            .with_context(|| format!("Bad filters JSON for subscription '{}'", self.id))?;

        let webhooks = webhooks
            .into_iter()
            .filter(|w| w.active)
            .map(WebhookRow::into_config)
            .collect::<Result<Vec<_>>>()?;

        Ok(Subscription {
            id: self.id,
            name: self.name,
            contract_addresses,
            event_signatures,
            filters,
            webhooks,
        })
    }
}

impl WebhookRow {
    pub fn into_config(self) -> Result<WebhookConfig> {
        let format: WebhookFormat = serde_json::from_value(serde_json::json!(self.format))
            .with_context(|| format!("Unknown webhook format '{}' for '{}'", self.format, self.id))?;
        let headers: HashMap<String, String> = serde_json::from_value(self.headers)
            .with_context(|| format!("Bad headers JSON for webhook '{}'", self.id))?;

        Ok(WebhookConfig {
            id: self.id,
            url: self.url,
            format,
            headers,
            timeout_ms: self.timeout_ms.max(0) as u64,
            retry_attempts: self.retry_attempts.max(0) as u32,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DeliveryRow {
    pub id: Uuid,
    pub subscription_id: String,
    pub webhook_id: String,
    pub event_data: serde_json::Value,
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub max_attempts: i32,
    pub status: String,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DeliveryRow {
    pub fn into_delivery(self) -> Result<WebhookDelivery> {
        let event: ChainEvent = serde_json::from_value(self.event_data)
            .with_context(|| format!("Bad event_data JSON for delivery {}", self.id))?;
        let status = DeliveryStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!("Delivery {}: {e}", self.id))?;

        Ok(WebhookDelivery {
            id: self.id,
            subscription_id: self.subscription_id,
            webhook_id: self.webhook_id,
            event,
            payload: self.payload,
            attempts: self.attempts.max(0) as u32,
            max_attempts: self.max_attempts.max(0) as u32,
            status,
            next_retry_at: self.next_retry_at,
            last_error: self.last_error,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DeadLetterRow {
    pub id: Uuid,
    pub subscription_id: String,
    pub webhook_id: String,
    pub event_data: serde_json::Value,
    pub payload: serde_json::Value,
    pub failure_reason: String,
    pub failed_at: DateTime<Utc>,
    pub attempts: i32,
    pub last_error: Option<String>,
}

impl DeadLetterRow {
    pub fn into_entry(self) -> Result<DeadLetterEntry> {
        let event: ChainEvent = serde_json::from_value(self.event_data)
            .with_context(|| format!("Bad event_data JSON for dead-letter entry {}", self.id))?;

        Ok(DeadLetterEntry {
            id: self.id,
            subscription_id: self.subscription_id,
            webhook_id: self.webhook_id,
            event,
            payload: self.payload,
            failure_reason: self.failure_reason,
            failed_at: self.failed_at,
            attempts: self.attempts.max(0) as u32,
            last_error: self.last_error,
        })
    }
}
