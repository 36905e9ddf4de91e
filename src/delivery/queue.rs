//! Durable delivery queue and dispatcher
//!
//! The dispatcher polls the store for eligible deliveries, runs each one
//! through the circuit-breaker gate and the sender, and writes the outcome
//! back before anything else observes it. Concurrency is bounded by a
//! semaphore; a delivery is never in flight twice because the store's claim
//! marks it processing atomically.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::circuit::CircuitBreakerManager;
use super::dead_letter::DeadLetterQueue;
use super::error::Result;
use super::sender::WebhookSender;
use super::store::{DeliveryStore, QueueStats};
use super::tracker::{DeliveryResult, DeliveryTracker};
use crate::constants::delivery as consts;
use crate::metrics;
use crate::types::WebhookDelivery;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Upper bound on concurrently in-flight deliveries.
    pub max_concurrent_deliveries: usize,
    /// Seconds between store polls when the queue is idle.
    pub poll_interval_secs: u64,
    /// Base retry delay in seconds; doubles per attempt.
    pub retry_base_delay_secs: u64,
    /// Retry delay ceiling in seconds.
    pub retry_max_delay_secs: u64,
    /// Terminal rows older than this many hours are purged.
    pub cleanup_max_age_hours: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_deliveries: consts::DEFAULT_MAX_CONCURRENT_DELIVERIES,
            poll_interval_secs: consts::DEFAULT_POLL_INTERVAL_SECS,
            retry_base_delay_secs: consts::DEFAULT_RETRY_BASE_DELAY_SECS,
            retry_max_delay_secs: consts::DEFAULT_RETRY_MAX_DELAY_SECS,
            cleanup_max_age_hours: consts::DEFAULT_CLEANUP_MAX_AGE_HOURS,
        }
    }
}

impl QueueConfig {
    /// Exponential backoff with jitter: base * 2^attempts, capped, plus up
    /// to `RETRY_JITTER_FACTOR` of random spread so retries from a burst of
    /// failures do not land on the endpoint at the same instant.
    pub fn retry_delay(&self, attempts: u32) -> Duration {
        let exp = self
            .retry_base_delay_secs
            .saturating_mul(2u64.saturating_pow(attempts.min(16)));
        let capped = exp.min(self.retry_max_delay_secs);
        let jitter_bound = (capped as f64 * consts::RETRY_JITTER_FACTOR).max(0.0);
        let jitter = if jitter_bound > 0.0 {
            rand::thread_rng().gen_range(0.0..jitter_bound)
        } else {
            0.0
        };
        Duration::from_secs_f64(capped as f64 + jitter)
    }
}

pub struct DeliveryQueue {
    store: Arc<dyn DeliveryStore>,
    dead_letter: Arc<DeadLetterQueue>,
    sender: Arc<WebhookSender>,
    circuit: Arc<CircuitBreakerManager>,
    tracker: Arc<DeliveryTracker>,
    config: QueueConfig,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl DeliveryQueue {
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        dead_letter: Arc<DeadLetterQueue>,
        sender: Arc<WebhookSender>,
        circuit: Arc<CircuitBreakerManager>,
        tracker: Arc<DeliveryTracker>,
        config: QueueConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_deliveries.max(1)));
        Self {
            store,
            dead_letter,
            sender,
            circuit,
            tracker,
            config,
            semaphore,
            cancel: CancellationToken::new(),
        }
    }

    /// Writes a fresh delivery through to the store.
    pub async fn enqueue(&self, delivery: WebhookDelivery) -> Result<()> {
        debug!(
            "Enqueuing delivery {} for webhook '{}' (subscription '{}')",
            delivery.id, delivery.webhook_id, delivery.subscription_id
        );
        self.store.enqueue(&delivery).await?;
        metrics::record_delivery_enqueued(&delivery.webhook_id);
        Ok(())
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.store.stats().await
    }

    /// Moves a dead-letter entry back into the live queue with its attempt
    /// counter reset. Returns the new delivery id, or `None` when the entry
    /// no longer exists.
    pub async fn retry_dead_letter(&self, entry_id: Uuid) -> Result<Option<Uuid>> {
        match self.dead_letter.take(entry_id).await? {
            Some(entry) => {
                let delivery = entry.to_delivery();
                let id = delivery.id;
                self.enqueue(delivery).await?;
                info!("Requeued dead-letter entry {entry_id} as delivery {id}");
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Dispatcher loop. Runs until [`stop`](Self::stop) is called; claimed
    /// deliveries in flight at that point complete on their own.
    pub async fn run(self: Arc<Self>) {
        info!(
            "Delivery dispatcher started (max {} concurrent)",
            self.config.max_concurrent_deliveries
        );
        let cancel = self.cancel.clone();
        let mut cleanup_tick: u64 = 0;
        let poll_interval = Duration::from_secs(self.config.poll_interval_secs.max(1));

        loop {
            tokio::select! {
                () = tokio::time::sleep(poll_interval) => {}
                () = cancel.cancelled() => {
                    info!("Delivery dispatcher stopping");
                    return;
                }
            }

            let free = self.semaphore.available_permits();
            if free == 0 {
                continue;
            }

            match self.store.claim_batch(free, Utc::now()).await {
                Ok(batch) => {
                    for delivery in batch {
                        let permit = match self.semaphore.clone().acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => return,
                        };
                        let queue = self.clone();
                        tokio::spawn(async move {
                            queue.dispatch(delivery).await;
                            drop(permit);
                        });
                    }
                }
                Err(e) => error!("Failed to claim deliveries: {e}"),
            }

            cleanup_tick += 1;
            let ticks_per_cleanup = 3600 / self.config.poll_interval_secs.max(1).min(3600);
            if cleanup_tick >= ticks_per_cleanup {
                cleanup_tick = 0;
                let cutoff =
                    Utc::now() - chrono::Duration::hours(self.config.cleanup_max_age_hours as i64);
                match self.store.delete_finished_before(cutoff).await {
                    Ok(0) => {}
                    Ok(n) => debug!("Purged {n} finished deliveries"),
                    Err(e) => warn!("Delivery cleanup failed: {e}"),
                }
            }
        }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Drains everything currently eligible, sequentially. Test hook that
    /// exercises the same dispatch path as the loop without timing.
    pub async fn process_available(&self) -> Result<usize> {
        let mut processed = 0;
        loop {
            let batch = self.store.claim_batch(16, Utc::now()).await?;
            if batch.is_empty() {
                return Ok(processed);
            }
            for delivery in batch {
                self.dispatch(delivery).await;
                processed += 1;
            }
        }
    }

    /// One attempt for one claimed delivery: circuit gate, send, outcome.
    async fn dispatch(&self, delivery: WebhookDelivery) {
        let attempted = self.circuit.should_allow_request(&delivery.webhook_id).await;
        let result = if attempted {
            self.sender.send_webhook(&delivery).await
        } else {
            // Synthetic failure, no HTTP call, still tracked.
            let result = DeliveryResult::failure("circuit breaker open", None, 0);
            self.tracker.track_delivery(&delivery, result.clone()).await;
            metrics::record_circuit_short_circuit(&delivery.webhook_id);
            result
        };

        if let Err(e) = self.handle_outcome(&delivery, &result, attempted).await {
            error!(
                "Failed to record outcome for delivery {}: {e}",
                delivery.id
            );
        }
    }

    /// `attempted` is false for short-circuited deliveries. Only real
    /// attempts drive breaker transitions; a denied delivery concurrent
    /// with a half-open probe leaves the probe in flight.
    async fn handle_outcome(
        &self,
        delivery: &WebhookDelivery,
        result: &DeliveryResult,
        attempted: bool,
    ) -> Result<()> {
        if result.success {
            self.circuit.record_success(&delivery.webhook_id).await;
            self.store.mark_completed(delivery.id).await?;
            metrics::record_delivery_completed(&delivery.webhook_id);
            debug!("Delivery {} completed", delivery.id);
            return Ok(());
        }

        if attempted {
            self.circuit.record_failure(&delivery.webhook_id).await;
        }
        let error = result.error.as_deref().unwrap_or("unknown error");
        let attempts = delivery.attempts + 1;

        if attempts >= delivery.max_attempts.max(1) {
            warn!(
                "Delivery {} exhausted {} attempts, dead-lettering: {error}",
                delivery.id, attempts
            );
            self.store.mark_failed(delivery.id, attempts, error).await?;
            let mut exhausted = delivery.clone();
            exhausted.attempts = attempts;
            self.dead_letter
                .add_failed_delivery(&exhausted, "max delivery attempts exceeded", Some(error))
                .await?;
            metrics::record_delivery_dead_lettered(&delivery.webhook_id);
        } else {
            let delay = self.config.retry_delay(attempts);
            let next_retry_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(
                    self.config.retry_max_delay_secs as i64,
                ));
            debug!(
                "Delivery {} failed (attempt {attempts}/{}), retrying in {:.1}s: {error}",
                delivery.id,
                delivery.max_attempts,
                delay.as_secs_f64()
            );
            self.store
                .mark_retry(delivery.id, attempts, next_retry_at, error)
                .await?;
            metrics::record_delivery_retry(&delivery.webhook_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_base(base_secs: u64, max_secs: u64) -> QueueConfig {
        QueueConfig {
            retry_base_delay_secs: base_secs,
            retry_max_delay_secs: max_secs,
            ..QueueConfig::default()
        }
    }

    #[test]
    fn retry_delay_doubles_per_attempt() {
        let config = config_with_base(5, 300);
        // Jitter adds at most 25%, so check the floor of each delay.
        assert!(config.retry_delay(0).as_secs_f64() >= 5.0);
        assert!(config.retry_delay(1).as_secs_f64() >= 10.0);
        assert!(config.retry_delay(3).as_secs_f64() >= 40.0);
    }

    #[test]
    fn retry_delay_is_capped() {
        let config = config_with_base(5, 300);
        let delay = config.retry_delay(20);
        assert!(delay.as_secs_f64() >= 300.0);
        assert!(delay.as_secs_f64() <= 300.0 * (1.0 + consts::RETRY_JITTER_FACTOR));
    }

    #[test]
    fn retry_delay_survives_huge_attempt_counts() {
        let config = config_with_base(5, 300);
        // Must not overflow even with an absurd attempt counter.
        let delay = config.retry_delay(u32::MAX);
        assert!(delay.as_secs_f64() <= 300.0 * (1.0 + consts::RETRY_JITTER_FACTOR));
    }

    #[test]
    fn default_config_matches_documented_limits() {
        let config = QueueConfig::default();
        assert_eq!(config.max_concurrent_deliveries, 10);
        assert_eq!(config.retry_base_delay_secs, 5);
        assert_eq!(config.retry_max_delay_secs, 300);
    }
}
