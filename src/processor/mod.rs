//! Event processor
//!
//! The orchestrator: owns subscription persistence, wires listener output
//! through the filter engine, formats per-webhook payloads, and enqueues
//! deliveries. Persistence happens before registration so a crash between
//! the two never leaves a subscription the relay delivers for but cannot
//! rehydrate.

pub mod store;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::chain::ChainConnection;
use crate::constants::processor::STARTUP_TIMEOUT_SECS;
use crate::delivery::formatters::format_payload;
use crate::delivery::queue::DeliveryQueue;
use crate::delivery::sender::WebhookSender;
use crate::delivery::store::QueueStats;
use crate::events::{EventListener, ListenerSignal};
use crate::filters::engine::evaluate;
use crate::filters::validator::validate_filters;
use crate::metrics;
use crate::types::{ChainEvent, Subscription, WebhookDelivery};

pub use store::{MemorySubscriptionStore, SubscriptionStore};

/// Running counters exposed alongside the queue's own stats.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessorStats {
    pub uptime_secs: u64,
    pub subscriptions: usize,
    pub events_received: u64,
    pub events_matched: u64,
    pub events_filtered: u64,
    pub event_errors: u64,
    pub queue: QueueStats,
}

pub struct EventProcessor {
    connection: ChainConnection,
    listener: Arc<EventListener>,
    signals: Mutex<Option<mpsc::Receiver<ListenerSignal>>>,
    queue: Arc<DeliveryQueue>,
    sender: Arc<WebhookSender>,
    store: Arc<dyn SubscriptionStore>,
    started_at: Instant,
    events_received: AtomicU64,
    events_matched: AtomicU64,
    events_filtered: AtomicU64,
    event_errors: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EventProcessor {
    pub fn new(
        connection: ChainConnection,
        listener: Arc<EventListener>,
        signals: mpsc::Receiver<ListenerSignal>,
        queue: Arc<DeliveryQueue>,
        sender: Arc<WebhookSender>,
        store: Arc<dyn SubscriptionStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            connection,
            listener,
            signals: Mutex::new(Some(signals)),
            queue,
            sender,
            store,
            started_at: Instant::now(),
            events_received: AtomicU64::new(0),
            events_matched: AtomicU64::new(0),
            events_filtered: AtomicU64::new(0),
            event_errors: AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Connects to the node (bounded by a startup timeout), rehydrates
    /// persisted subscriptions, and spawns the listener, dispatcher, and
    /// signal-handling tasks.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        info!("Starting event processor");

        self.load_subscriptions_from_database().await?;

        let connect = self.connection.connect();
        match timeout(Duration::from_secs(STARTUP_TIMEOUT_SECS), connect).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                // Reconnection is already scheduled; start degraded.
                warn!("Initial node connection failed, continuing with reconnects: {e}");
            }
            Err(_) => {
                warn!("Initial node connection timed out, continuing with reconnects");
            }
        }

        let mut tasks = self.tasks.lock().await;
        tasks.push(tokio::spawn(self.listener.clone().run()));
        tasks.push(tokio::spawn(self.queue.clone().run()));

        let signals = self
            .signals
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow!("Event processor already started"))?;
        let processor = self.clone();
        tasks.push(tokio::spawn(async move {
            processor.signal_loop(signals).await;
        }));

        info!("Event processor started");
        Ok(())
    }

    /// Stops background tasks and tears down the connection. Safe while
    /// deliveries are in flight; those complete or time out on their own.
    pub async fn stop(&self) {
        info!("Stopping event processor");
        self.queue.stop();
        self.connection.disconnect().await;
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
    }

    /// Validates, persists, then registers. Persistence failure propagates
    /// and leaves no partial state.
    pub async fn add_subscription(&self, subscription: Subscription) -> Result<()> {
        subscription
            .validate()
            .map_err(|reason| anyhow!("Invalid subscription: {reason}"))?;
        if let Err(errors) = validate_filters(&subscription.filters) {
            return Err(anyhow!(
                "Invalid filters for subscription '{}': {}",
                subscription.id,
                errors.join("; ")
            ));
        }

        self.store
            .upsert(&subscription)
            .await
            .with_context(|| format!("Failed to persist subscription '{}'", subscription.id))?;

        for webhook in &subscription.webhooks {
            self.sender.register_webhook(webhook.clone()).await;
        }

        let id = subscription.id.clone();
        self.listener
            .register(Arc::new(subscription))
            .await
            .with_context(|| format!("Failed to register subscription '{id}'"))?;

        metrics::set_active_subscriptions(self.listener.subscription_count().await as i64);
        info!("Added subscription '{id}'");
        Ok(())
    }

    /// Unknown ids log a warning and are a no-op.
    pub async fn remove_subscription(&self, subscription_id: &str) -> Result<()> {
        let removed = self.listener.unregister(subscription_id).await;
        let persisted = self.store.remove(subscription_id).await?;
        if !removed && !persisted {
            warn!("Remove requested for unknown subscription '{subscription_id}'");
            return Ok(());
        }
        metrics::set_active_subscriptions(self.listener.subscription_count().await as i64);
        Ok(())
    }

    /// Rehydrates the listener from persisted rows. Malformed rows are
    /// skipped individually, never fatal to the load.
    pub async fn load_subscriptions_from_database(&self) -> Result<()> {
        let subscriptions = self
            .store
            .load_all()
            .await
            .context("Failed to load subscriptions")?;
        let total = subscriptions.len();
        let mut loaded = 0;

        for subscription in subscriptions {
            if let Err(reason) = subscription.validate() {
                error!(
                    "Skipping invalid persisted subscription '{}': {reason}",
                    subscription.id
                );
                continue;
            }
            for webhook in &subscription.webhooks {
                self.sender.register_webhook(webhook.clone()).await;
            }
            let id = subscription.id.clone();
            if let Err(e) = self.listener.register(Arc::new(subscription)).await {
                error!("Skipping subscription '{id}', registration failed: {e}");
                continue;
            }
            loaded += 1;
        }

        metrics::set_active_subscriptions(loaded as i64);
        info!("Loaded {loaded}/{total} persisted subscriptions");
        Ok(())
    }

    pub async fn stats(&self) -> ProcessorStats {
        let queue = self.queue.stats().await.unwrap_or_default();
        ProcessorStats {
            uptime_secs: self.started_at.elapsed().as_secs(),
            subscriptions: self.listener.subscription_count().await,
            events_received: self.events_received.load(Ordering::Relaxed),
            events_matched: self.events_matched.load(Ordering::Relaxed),
            events_filtered: self.events_filtered.load(Ordering::Relaxed),
            event_errors: self.event_errors.load(Ordering::Relaxed),
            queue,
        }
    }

    async fn signal_loop(&self, mut signals: mpsc::Receiver<ListenerSignal>) {
        while let Some(signal) = signals.recv().await {
            match signal {
                ListenerSignal::Event(subscription, event) => {
                    if let Err(e) = self.handle_event(&subscription, event).await {
                        error!(
                            "Event handling failed for subscription '{}': {e}",
                            subscription.id
                        );
                    }
                }
                ListenerSignal::SubscriptionError {
                    subscription_id,
                    error,
                } => {
                    self.event_errors.fetch_add(1, Ordering::Relaxed);
                    error!("Subscription '{subscription_id}' watcher error: {error}");
                }
                ListenerSignal::EventError {
                    subscription_id,
                    error,
                } => {
                    self.event_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("Event decode error for subscription '{subscription_id}': {error}");
                }
                ListenerSignal::ConnectionLost => {
                    warn!("Node connection lost, deliveries continue from the queue");
                }
            }
        }
    }

    /// Filter, then fan out one delivery per webhook. Enqueue failures are
    /// isolated per webhook; the first failure is surfaced after every
    /// webhook has been attempted.
    pub async fn handle_event(&self, subscription: &Subscription, event: ChainEvent) -> Result<()> {
        self.events_received.fetch_add(1, Ordering::Relaxed);
        metrics::record_event_received(&subscription.id);

        if !evaluate(&event, &subscription.filters) {
            self.events_filtered.fetch_add(1, Ordering::Relaxed);
            metrics::record_event_filtered(&subscription.id, false);
            debug!(
                "Event '{}' at block {} filtered out for subscription '{}'",
                event.event_name, event.block_number, subscription.id
            );
            return Ok(());
        }

        self.events_matched.fetch_add(1, Ordering::Relaxed);
        metrics::record_event_filtered(&subscription.id, true);
        debug!(
            "Event '{}' at block {} matched subscription '{}', fanning out to {} webhook(s)",
            event.event_name,
            event.block_number,
            subscription.id,
            subscription.webhooks.len()
        );

        let enqueues = subscription.webhooks.iter().map(|webhook| {
            let payload = format_payload(&event, webhook.format);
            let delivery = WebhookDelivery::new(&subscription.id, webhook, event.clone(), payload);
            async move {
                self.queue
                    .enqueue(delivery)
                    .await
                    .map_err(|e| anyhow!("enqueue failed for webhook '{}': {e}", webhook.id))
            }
        });

        let mut first_error = None;
        for result in futures::future::join_all(enqueues).await {
            if let Err(e) = result {
                error!("{e:#}");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::circuit::{CircuitBreakerManager, CircuitConfig};
    use crate::delivery::dead_letter::{DeadLetterConfig, DeadLetterQueue};
    use crate::delivery::error::DeliveryError;
    use crate::delivery::queue::QueueConfig;
    use crate::delivery::store::{
        DeliveryStore, MemoryDeadLetterStore, MemoryDeliveryStore, QueueStats,
    };
    use crate::delivery::tracker::DeliveryTracker;
    use crate::types::{WebhookConfig, WebhookFormat};
    use alloy::primitives::address;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::collections::HashMap;
    use uuid::Uuid;

    struct Harness {
        processor: Arc<EventProcessor>,
        delivery_store: Arc<MemoryDeliveryStore>,
    }

    fn harness() -> Harness {
        let connection = ChainConnection::new("ws://localhost:8546").unwrap();
        let (listener, signals) = EventListener::new(connection.clone());

        let tracker = Arc::new(DeliveryTracker::new());
        let sender = Arc::new(WebhookSender::new(tracker.clone()).unwrap());
        let circuit = Arc::new(CircuitBreakerManager::new(CircuitConfig::default()));
        let delivery_store = Arc::new(MemoryDeliveryStore::new());
        let dead_letter = Arc::new(DeadLetterQueue::new(
            Arc::new(MemoryDeadLetterStore::new()),
            DeadLetterConfig::default(),
        ));
        let queue = Arc::new(DeliveryQueue::new(
            delivery_store.clone(),
            dead_letter,
            sender.clone(),
            circuit,
            tracker,
            QueueConfig::default(),
        ));
        let store = Arc::new(MemorySubscriptionStore::new());

        Harness {
            processor: EventProcessor::new(connection, listener, signals, queue, sender, store),
            delivery_store,
        }
    }

    fn test_subscription(filters: crate::filters::FilterMap) -> Subscription {
        Subscription {
            id: "sub-1".into(),
            name: "usdc transfers".into(),
            contract_addresses: vec![address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48")],
            event_signatures: vec!["Transfer(address from,address to,uint256 value)".into()],
            filters,
            webhooks: vec![
                WebhookConfig {
                    id: "wh-1".into(),
                    url: "https://hooks.example.com/a".into(),
                    format: WebhookFormat::Generic,
                    headers: HashMap::new(),
                    timeout_ms: 30_000,
                    retry_attempts: 3,
                },
                WebhookConfig {
                    id: "wh-2".into(),
                    url: "https://hooks.example.com/b".into(),
                    format: WebhookFormat::Zapier,
                    headers: HashMap::new(),
                    timeout_ms: 30_000,
                    retry_attempts: 3,
                },
            ],
        }
    }

    fn test_event() -> ChainEvent {
        let mut args = serde_json::Map::new();
        args.insert("value".into(), serde_json::json!("1000"));
        ChainEvent {
            contract_address: "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48".into(),
            event_name: "Transfer".into(),
            block_number: 100,
            transaction_hash: "0xabc".into(),
            log_index: 0,
            args,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn add_subscription_rejects_invalid_filters() {
        let h = harness();
        let mut filters = crate::filters::FilterMap::new();
        filters.insert(
            "args.value".into(),
            serde_json::from_value(serde_json::json!({"operator": "between", "value": 1}))
                .unwrap(),
        );
        let result = h.processor.add_subscription(test_subscription(filters)).await;
        assert!(result.is_err());
        assert_eq!(h.processor.stats().await.subscriptions, 0);
    }

    #[tokio::test]
    async fn remove_unknown_subscription_is_noop() {
        let h = harness();
        assert!(h.processor.remove_subscription("nope").await.is_ok());
    }

    #[tokio::test]
    async fn matched_event_enqueues_one_delivery_per_webhook() {
        let h = harness();
        let subscription = test_subscription(crate::filters::FilterMap::new());
        h.processor
            .add_subscription(subscription.clone())
            .await
            .unwrap();

        h.processor
            .handle_event(&subscription, test_event())
            .await
            .unwrap();

        let stats = h.delivery_store.stats().await.unwrap();
        assert_eq!(stats.pending, 2);

        let processor_stats = h.processor.stats().await;
        assert_eq!(processor_stats.events_received, 1);
        assert_eq!(processor_stats.events_matched, 1);
        assert_eq!(processor_stats.events_filtered, 0);
    }

    #[tokio::test]
    async fn filtered_event_enqueues_nothing() {
        let h = harness();
        let mut filters = crate::filters::FilterMap::new();
        filters.insert("args.value".into(), serde_json::from_value(serde_json::json!({"operator": "gt", "value": "5000"})).unwrap());
        let subscription = test_subscription(filters);

        h.processor
            .handle_event(&subscription, test_event())
            .await
            .unwrap();

        assert_eq!(h.delivery_store.stats().await.unwrap().pending, 0);
        let stats = h.processor.stats().await;
        assert_eq!(stats.events_filtered, 1);
        assert_eq!(stats.events_matched, 0);
    }

    #[tokio::test]
    async fn load_skips_invalid_rows_without_failing() {
        let connection = ChainConnection::new("ws://localhost:8546").unwrap();
        let (listener, signals) = EventListener::new(connection.clone());
        let tracker = Arc::new(DeliveryTracker::new());
        let sender = Arc::new(WebhookSender::new(tracker.clone()).unwrap());
        let queue = Arc::new(DeliveryQueue::new(
            Arc::new(MemoryDeliveryStore::new()),
            Arc::new(DeadLetterQueue::new(
                Arc::new(MemoryDeadLetterStore::new()),
                DeadLetterConfig::default(),
            )),
            sender.clone(),
            Arc::new(CircuitBreakerManager::new(CircuitConfig::default())),
            tracker,
            QueueConfig::default(),
        ));

        let good = test_subscription(crate::filters::FilterMap::new());
        let mut bad = test_subscription(crate::filters::FilterMap::new());
        bad.id = "sub-2".into();
        bad.event_signatures = vec!["NotASignature".into()];
        let store = Arc::new(MemorySubscriptionStore::with_seed(vec![good, bad]));

        let processor = EventProcessor::new(connection, listener, signals, queue, sender, store);
        processor.load_subscriptions_from_database().await.unwrap();
        assert_eq!(processor.stats().await.subscriptions, 1);
    }

    /// Store that refuses writes for one webhook id, passing the rest
    /// through to an in-memory store.
    struct RejectingStore {
        inner: MemoryDeliveryStore,
        reject_webhook: String,
    }

    #[async_trait]
    impl DeliveryStore for RejectingStore {
        async fn enqueue(&self, delivery: &WebhookDelivery) -> crate::delivery::error::Result<()> {
            if delivery.webhook_id == self.reject_webhook {
                return Err(DeliveryError::Storage("simulated write failure".into()));
            }
            self.inner.enqueue(delivery).await
        }

        async fn claim_batch(
            &self,
            limit: usize,
            now: DateTime<Utc>,
        ) -> crate::delivery::error::Result<Vec<WebhookDelivery>> {
            self.inner.claim_batch(limit, now).await
        }

        async fn mark_completed(&self, id: Uuid) -> crate::delivery::error::Result<()> {
            self.inner.mark_completed(id).await
        }

        async fn mark_retry(
            &self,
            id: Uuid,
            attempts: u32,
            next_retry_at: DateTime<Utc>,
            error: &str,
        ) -> crate::delivery::error::Result<()> {
            self.inner.mark_retry(id, attempts, next_retry_at, error).await
        }

        async fn mark_failed(
            &self,
            id: Uuid,
            attempts: u32,
            error: &str,
        ) -> crate::delivery::error::Result<()> {
            self.inner.mark_failed(id, attempts, error).await
        }

        async fn stats(&self) -> crate::delivery::error::Result<QueueStats> {
            self.inner.stats().await
        }

        async fn delete_finished_before(
            &self,
            cutoff: DateTime<Utc>,
        ) -> crate::delivery::error::Result<u64> {
            self.inner.delete_finished_before(cutoff).await
        }
    }

    #[tokio::test]
    async fn fan_out_attempts_every_webhook_and_surfaces_the_first_error() {
        let connection = ChainConnection::new("ws://localhost:8546").unwrap();
        let (listener, signals) = EventListener::new(connection.clone());
        let tracker = Arc::new(DeliveryTracker::new());
        let sender = Arc::new(WebhookSender::new(tracker.clone()).unwrap());

        let delivery_store = Arc::new(RejectingStore {
            inner: MemoryDeliveryStore::new(),
            reject_webhook: "wh-2".into(),
        });
        let queue = Arc::new(DeliveryQueue::new(
            delivery_store.clone(),
            Arc::new(DeadLetterQueue::new(
                Arc::new(MemoryDeadLetterStore::new()),
                DeadLetterConfig::default(),
            )),
            sender.clone(),
            Arc::new(CircuitBreakerManager::new(CircuitConfig::default())),
            tracker,
            QueueConfig::default(),
        ));
        let store = Arc::new(MemorySubscriptionStore::new());
        let processor = EventProcessor::new(connection, listener, signals, queue, sender, store);

        let subscription = test_subscription(crate::filters::FilterMap::new());
        let result = processor.handle_event(&subscription, test_event()).await;

        // The failing webhook surfaces an error, the other's delivery lands.
        let error = result.unwrap_err().to_string();
        assert!(error.contains("wh-2"), "unexpected error: {error}");
        assert_eq!(delivery_store.stats().await.unwrap().pending, 1);
    }
}
