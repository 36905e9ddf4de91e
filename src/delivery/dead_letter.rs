//! Dead-letter queue
//!
//! Terminal failure records. Writes here must not be silently dropped, so
//! `add_failed_delivery` propagates storage errors instead of logging them
//! away. A scheduled cleanup purges entries past the retention window.

use std::sync::Arc;

use anyhow::{Context, Result as AnyResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info};
use uuid::Uuid;

use super::error::Result;
use super::store::{DeadLetterStats, DeadLetterStore};
use crate::constants::dead_letter as consts;
use crate::types::{DeadLetterEntry, WebhookDelivery};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterConfig {
    pub enabled: bool,
    /// Entries older than this many days are purged by the cleanup job.
    pub max_retention_days: u32,
    /// Six-field cron expression for the cleanup job.
    pub cleanup_schedule: String,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retention_days: consts::DEFAULT_MAX_RETENTION_DAYS,
            cleanup_schedule: consts::DEFAULT_CLEANUP_SCHEDULE.to_string(),
        }
    }
}

pub struct DeadLetterQueue {
    store: Arc<dyn DeadLetterStore>,
    config: DeadLetterConfig,
}

impl DeadLetterQueue {
    pub fn new(store: Arc<dyn DeadLetterStore>, config: DeadLetterConfig) -> Self {
        Self { store, config }
    }

    /// Parks an exhausted delivery. Errors propagate: losing the terminal
    /// failure record is worse than retrying the write.
    pub async fn add_failed_delivery(
        &self,
        delivery: &WebhookDelivery,
        reason: &str,
        last_error: Option<&str>,
    ) -> Result<()> {
        let entry =
            DeadLetterEntry::from_delivery(delivery, reason, last_error.map(str::to_string));
        self.store.insert(&entry).await?;
        info!(
            "Dead-lettered delivery {} for webhook '{}' after {} attempts: {reason}",
            delivery.id, delivery.webhook_id, delivery.attempts
        );
        Ok(())
    }

    pub async fn get_failed_deliveries(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DeadLetterEntry>> {
        self.store.list(limit, offset).await
    }

    pub async fn get_failed_deliveries_for_webhook(
        &self,
        webhook_id: &str,
        limit: usize,
    ) -> Result<Vec<DeadLetterEntry>> {
        self.store.list_for_webhook(webhook_id, limit).await
    }

    pub async fn get_stats(&self) -> Result<DeadLetterStats> {
        self.store.stats().await
    }

    /// Removes and returns an entry for requeueing; `None` if it is gone.
    pub async fn take(&self, entry_id: Uuid) -> Result<Option<DeadLetterEntry>> {
        self.store.remove(entry_id).await
    }

    pub async fn purge_expired(&self) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(self.config.max_retention_days as i64);
        self.store.delete_older_than(cutoff).await
    }
}

/// Schedules periodic dead-letter retention cleanup.
pub struct CleanupManager {
    queue: Arc<DeadLetterQueue>,
    config: DeadLetterConfig,
    scheduler: JobScheduler,
}

impl CleanupManager {
    pub async fn new(queue: Arc<DeadLetterQueue>, config: DeadLetterConfig) -> AnyResult<Self> {
        let scheduler = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;
        Ok(Self {
            queue,
            config,
            scheduler,
        })
    }

    pub async fn start(&mut self) -> AnyResult<()> {
        if !self.config.enabled {
            info!("Dead-letter cleanup is disabled in configuration");
            return Ok(());
        }

        let schedule = self.config.cleanup_schedule.clone();
        info!("Starting dead-letter cleanup with cron schedule: {schedule}");

        let queue = Arc::clone(&self.queue);
        let job = Job::new_async(schedule.as_str(), move |_uuid, _l| {
            let queue = Arc::clone(&queue);
            Box::pin(async move {
                match queue.purge_expired().await {
                    Ok(0) => debug!("Dead-letter cleanup found nothing to purge"),
                    Ok(n) => info!("Dead-letter cleanup purged {n} expired entries"),
                    Err(e) => error!("Dead-letter cleanup failed: {e}"),
                }
            })
        })
        .context("Failed to create cleanup job")?;

        self.scheduler
            .add(job)
            .await
            .context("Failed to add job to scheduler")?;
        self.scheduler
            .start()
            .await
            .context("Failed to start scheduler")?;
        Ok(())
    }

    pub async fn stop(&mut self) -> AnyResult<()> {
        self.scheduler
            .shutdown()
            .await
            .context("Failed to shutdown scheduler")?;
        Ok(())
    }
}
