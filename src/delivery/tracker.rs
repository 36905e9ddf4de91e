//! Delivery attempt tracker
//!
//! Non-authoritative observability store. Keeps a bounded in-memory history
//! per webhook so operators can ask "how is this endpoint doing" without a
//! database query. The queue's persistent store remains the source of truth
//! for delivery status.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::constants::tracker::HISTORY_LIMIT;
use crate::types::WebhookDelivery;

/// Outcome of one send attempt as reported by the sender.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryResult {
    pub success: bool,
    pub status_code: Option<u16>,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

impl DeliveryResult {
    pub fn success(status_code: u16, response_time_ms: u64) -> Self {
        Self {
            success: true,
            status_code: Some(status_code),
            response_time_ms,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>, status_code: Option<u16>, response_time_ms: u64) -> Self {
        Self {
            success: false,
            status_code,
            response_time_ms,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackedAttempt {
    pub delivery_id: Uuid,
    pub subscription_id: String,
    pub attempt: u32,
    pub result: DeliveryResult,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregate view over one webhook's history.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeliveryStats {
    pub total_attempts: u64,
    pub successful: u64,
    pub failed: u64,
    pub average_response_time_ms: f64,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct DeliveryTracker {
    history: Mutex<HashMap<String, VecDeque<TrackedAttempt>>>,
}

impl DeliveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one attempt to the webhook's bounded history. Never fails and
    /// never blocks the pipeline beyond the map lock.
    pub async fn track_delivery(&self, delivery: &WebhookDelivery, result: DeliveryResult) {
        let mut history = self.history.lock().await;
        let entries = history.entry(delivery.webhook_id.clone()).or_default();
        if entries.len() >= HISTORY_LIMIT {
            entries.pop_front();
        }
        entries.push_back(TrackedAttempt {
            delivery_id: delivery.id,
            subscription_id: delivery.subscription_id.clone(),
            attempt: delivery.attempts,
            result,
            recorded_at: Utc::now(),
        });
    }

    /// Aggregates from the in-memory history. Zeroed stats for webhooks the
    /// tracker has never seen.
    pub async fn get_delivery_stats(&self, webhook_id: &str) -> DeliveryStats {
        let history = self.history.lock().await;
        let Some(entries) = history.get(webhook_id) else {
            return DeliveryStats::default();
        };

        let total_attempts = entries.len() as u64;
        let successful = entries.iter().filter(|e| e.result.success).count() as u64;
        let total_time: u64 = entries.iter().map(|e| e.result.response_time_ms).sum();
        let average_response_time_ms = if total_attempts == 0 {
            0.0
        } else {
            total_time as f64 / total_attempts as f64
        };

        DeliveryStats {
            total_attempts,
            successful,
            failed: total_attempts - successful,
            average_response_time_ms,
            last_attempt_at: entries.back().map(|e| e.recorded_at),
        }
    }

}
