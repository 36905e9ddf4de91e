//! Delivery storage abstraction
//!
//! The queue and dead-letter store talk to storage through these traits so
//! the dispatch logic can be tested against in-memory implementations while
//! production runs on PostgreSQL. The persistent store is the single source
//! of truth for delivery status; every transition is written through before
//! the dispatcher considers it final.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::error::Result;
use crate::types::{DeadLetterEntry, DeliveryStatus, WebhookDelivery};

/// Counts by status plus scheduling info, for operator visibility.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Aggregates over the dead-letter store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeadLetterStats {
    pub total: u64,
    pub last_24h: u64,
    pub last_7d: u64,
    /// Most frequent failure reasons, descending.
    pub top_reasons: Vec<(String, u64)>,
}

#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Persists a fresh pending delivery.
    async fn enqueue(&self, delivery: &WebhookDelivery) -> Result<()>;

    /// Atomically claims up to `limit` eligible deliveries (pending, with
    /// `next_retry_at` unset or in the past), marking them processing.
    /// A delivery claimed here is invisible to concurrent claimers.
    async fn claim_batch(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<WebhookDelivery>>;

    /// Terminal success.
    async fn mark_completed(&self, id: Uuid) -> Result<()>;

    /// Reschedules a failed attempt for a later retry.
    async fn mark_retry(
        &self,
        id: Uuid,
        attempts: u32,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()>;

    /// Terminal failure; the caller is responsible for dead-lettering.
    async fn mark_failed(&self, id: Uuid, attempts: u32, error: &str) -> Result<()>;

    async fn stats(&self) -> Result<QueueStats>;

    /// Removes terminal rows older than the cutoff. Returns rows removed.
    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    async fn insert(&self, entry: &DeadLetterEntry) -> Result<()>;

    /// Most-recent-first page of entries.
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<DeadLetterEntry>>;

    async fn list_for_webhook(&self, webhook_id: &str, limit: usize)
        -> Result<Vec<DeadLetterEntry>>;

    /// Removes and returns the entry, `None` if it no longer exists.
    async fn remove(&self, id: Uuid) -> Result<Option<DeadLetterEntry>>;

    async fn stats(&self) -> Result<DeadLetterStats>;

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// In-memory delivery store for tests and single-process runs.
#[derive(Default)]
pub struct MemoryDeliveryStore {
    deliveries: Mutex<HashMap<Uuid, WebhookDelivery>>,
}

impl MemoryDeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: Uuid) -> Option<WebhookDelivery> {
        self.deliveries.lock().await.get(&id).cloned()
    }
}

#[async_trait]
impl DeliveryStore for MemoryDeliveryStore {
    async fn enqueue(&self, delivery: &WebhookDelivery) -> Result<()> {
        self.deliveries
            .lock()
            .await
            .insert(delivery.id, delivery.clone());
        Ok(())
    }

    async fn claim_batch(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<WebhookDelivery>> {
        let mut deliveries = self.deliveries.lock().await;
        let mut eligible: Vec<Uuid> = deliveries
            .values()
            .filter(|d| {
                d.status == DeliveryStatus::Pending
                    && d.next_retry_at.map(|at| at <= now).unwrap_or(true)
            })
            .map(|d| d.id)
            .collect();
        eligible.sort_by_key(|id| deliveries[id].created_at);
        eligible.truncate(limit);

        let mut claimed = Vec::with_capacity(eligible.len());
        for id in eligible {
            if let Some(delivery) = deliveries.get_mut(&id) {
                delivery.status = DeliveryStatus::Processing;
                claimed.push(delivery.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_completed(&self, id: Uuid) -> Result<()> {
        if let Some(delivery) = self.deliveries.lock().await.get_mut(&id) {
            delivery.status = DeliveryStatus::Completed;
            delivery.next_retry_at = None;
            delivery.last_error = None;
        }
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: Uuid,
        attempts: u32,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        if let Some(delivery) = self.deliveries.lock().await.get_mut(&id) {
            delivery.status = DeliveryStatus::Pending;
            delivery.attempts = attempts;
            delivery.next_retry_at = Some(next_retry_at);
            delivery.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, attempts: u32, error: &str) -> Result<()> {
        if let Some(delivery) = self.deliveries.lock().await.get_mut(&id) {
            delivery.status = DeliveryStatus::Failed;
            delivery.attempts = attempts;
            delivery.next_retry_at = None;
            delivery.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let deliveries = self.deliveries.lock().await;
        let mut stats = QueueStats::default();
        for delivery in deliveries.values() {
            match delivery.status {
                DeliveryStatus::Pending => stats.pending += 1,
                DeliveryStatus::Processing => stats.processing += 1,
                DeliveryStatus::Completed => stats.completed += 1,
                DeliveryStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut deliveries = self.deliveries.lock().await;
        let before = deliveries.len();
        deliveries.retain(|_, d| {
            !(matches!(
                d.status,
                DeliveryStatus::Completed | DeliveryStatus::Failed
            ) && d.created_at < cutoff)
        });
        Ok((before - deliveries.len()) as u64)
    }
}

/// In-memory dead-letter store for tests and single-process runs.
#[derive(Default)]
pub struct MemoryDeadLetterStore {
    entries: Mutex<Vec<DeadLetterEntry>>,
}

impl MemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeadLetterStore for MemoryDeadLetterStore {
    async fn insert(&self, entry: &DeadLetterEntry) -> Result<()> {
        self.entries.lock().await.push(entry.clone());
        Ok(())
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<DeadLetterEntry>> {
        let mut entries = self.entries.lock().await.clone();
        entries.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        Ok(entries.into_iter().skip(offset).take(limit).collect())
    }

    async fn list_for_webhook(
        &self,
        webhook_id: &str,
        limit: usize,
    ) -> Result<Vec<DeadLetterEntry>> {
        let mut entries: Vec<DeadLetterEntry> = self
            .entries
            .lock()
            .await
            .iter()
            .filter(|e| e.webhook_id == webhook_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn remove(&self, id: Uuid) -> Result<Option<DeadLetterEntry>> {
        let mut entries = self.entries.lock().await;
        match entries.iter().position(|e| e.id == id) {
            Some(index) => Ok(Some(entries.remove(index))),
            None => Ok(None),
        }
    }

    async fn stats(&self) -> Result<DeadLetterStats> {
        let entries = self.entries.lock().await;
        let now = Utc::now();
        let day_ago = now - ChronoDuration::hours(24);
        let week_ago = now - ChronoDuration::days(7);

        let mut reasons: HashMap<String, u64> = HashMap::new();
        let mut last_24h = 0;
        let mut last_7d = 0;
        for entry in entries.iter() {
            *reasons.entry(entry.failure_reason.clone()).or_default() += 1;
            if entry.failed_at >= day_ago {
                last_24h += 1;
            }
            if entry.failed_at >= week_ago {
                last_7d += 1;
            }
        }

        let mut top_reasons: Vec<(String, u64)> = reasons.into_iter().collect();
        top_reasons.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_reasons.truncate(5);

        Ok(DeadLetterStats {
            total: entries.len() as u64,
            last_24h,
            last_7d,
            top_reasons,
        })
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| e.failed_at >= cutoff);
        Ok((before - entries.len()) as u64)
    }
}
