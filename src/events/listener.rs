//! Event listener
//!
//! Holds the live subscription registry and translates it into per-contract
//! log watchers on the node connection. Watchers are cheap tokio tasks, one
//! per contract address and event signature pair; they are torn down on
//! disconnect and rebuilt from the registry on every reconnect. Normalized
//! events flow out through an mpsc channel the processor drains.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::Address;
use alloy::providers::Provider;
use alloy::rpc::types::Filter;
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::{ListenerError, Result};
use super::normalizer::{normalize_log, EventSignature};
use crate::chain::{ChainConnection, ConnectionEvent};
use crate::types::{ChainEvent, Subscription};

/// Signals emitted by the listener.
#[derive(Debug)]
pub enum ListenerSignal {
    /// A raw log matched a registered subscription and normalized cleanly.
    Event(Arc<Subscription>, ChainEvent),
    /// Attaching a watcher failed; the subscription stays registered.
    SubscriptionError { subscription_id: String, error: String },
    /// One event failed to normalize. Isolated, the watcher keeps running.
    EventError { subscription_id: String, error: String },
    /// The node connection dropped; watchers are down until reconnect.
    ConnectionLost,
}

struct Registered {
    subscription: Arc<Subscription>,
    watchers: Vec<JoinHandle<()>>,
}

pub struct EventListener {
    connection: ChainConnection,
    registry: Mutex<HashMap<String, Registered>>,
    signals: mpsc::Sender<ListenerSignal>,
}

impl EventListener {
    pub fn new(connection: ChainConnection) -> (Arc<Self>, mpsc::Receiver<ListenerSignal>) {
        let (tx, rx) = mpsc::channel(256);
        let listener = Arc::new(Self {
            connection,
            registry: Mutex::new(HashMap::new()),
            signals: tx,
        });
        (listener, rx)
    }

    /// Watches connection lifecycle events and keeps watchers in sync.
    /// Meant to run as its own task for the life of the relay.
    pub async fn run(self: Arc<Self>) {
        let mut events = self.connection.subscribe();
        loop {
            match events.recv().await {
                Ok(ConnectionEvent::Connected) => {
                    info!("Node connected, attaching event watchers");
                    self.attach_all().await;
                }
                Ok(ConnectionEvent::Disconnected) | Ok(ConnectionEvent::GaveUp) => {
                    self.detach_all().await;
                    let _ = self.signals.send(ListenerSignal::ConnectionLost).await;
                }
                Ok(ConnectionEvent::Error(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Listener lagged {n} connection events, resyncing watchers");
                    self.detach_all().await;
                    if self.connection.is_connected().await {
                        self.attach_all().await;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    /// Registers a subscription and, when connected, attaches its watchers.
    pub async fn register(&self, subscription: Arc<Subscription>) -> Result<()> {
        let id = subscription.id.clone();
        let watchers = if self.connection.is_connected().await {
            self.attach(&subscription).await?
        } else {
            debug!("Not connected, deferring watchers for subscription '{id}'");
            vec![]
        };

        let mut registry = self.registry.lock().await;
        if let Some(old) = registry.insert(id, Registered { subscription, watchers }) {
            for handle in old.watchers {
                handle.abort();
            }
        }
        Ok(())
    }

    /// Removes a subscription and its watchers. Unknown ids are a no-op.
    pub async fn unregister(&self, subscription_id: &str) -> bool {
        let mut registry = self.registry.lock().await;
        match registry.remove(subscription_id) {
            Some(entry) => {
                for handle in entry.watchers {
                    handle.abort();
                }
                info!("Unregistered subscription '{subscription_id}'");
                true
            }
            None => false,
        }
    }

    pub async fn subscription_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    async fn attach_all(&self) {
        let subscriptions: Vec<Arc<Subscription>> = {
            let registry = self.registry.lock().await;
            registry.values().map(|r| r.subscription.clone()).collect()
        };

        for subscription in subscriptions {
            let id = subscription.id.clone();
            match self.attach(&subscription).await {
                Ok(watchers) => self.install_watchers(&id, watchers).await,
                Err(e) => {
                    error!("Failed to attach watchers for subscription '{id}': {e}");
                    let _ = self
                        .signals
                        .send(ListenerSignal::SubscriptionError {
                            subscription_id: id,
                            error: e.to_string(),
                        })
                        .await;
                }
            }
        }
    }

    /// Replaces a subscription's watchers, aborting the old set. Keeps
    /// watcher counts stable across repeated reconnects.
    async fn install_watchers(&self, subscription_id: &str, watchers: Vec<JoinHandle<()>>) {
        let mut registry = self.registry.lock().await;
        if let Some(entry) = registry.get_mut(subscription_id) {
            for handle in entry.watchers.drain(..) {
                handle.abort();
            }
            entry.watchers = watchers;
        } else {
            // Unregistered while we were attaching.
            for handle in watchers {
                handle.abort();
            }
        }
    }

    async fn detach_all(&self) {
        let mut registry = self.registry.lock().await;
        for entry in registry.values_mut() {
            for handle in entry.watchers.drain(..) {
                handle.abort();
            }
        }
    }

    /// Opens one log stream per contract address and event signature.
    async fn attach(&self, subscription: &Arc<Subscription>) -> Result<Vec<JoinHandle<()>>> {
        let provider = self
            .connection
            .provider()
            .await
            .ok_or(ListenerError::NotConnected)?;

        let mut watchers = Vec::new();
        for address in &subscription.contract_addresses {
            for raw_signature in &subscription.event_signatures {
                let signature = EventSignature::parse(raw_signature).map_err(|e| {
                    ListenerError::SubscribeFailed {
                        contract: format!("{address:?}"),
                        signature: raw_signature.clone(),
                        reason: e.to_string(),
                    }
                })?;

                let filter = Filter::new()
                    .address(*address)
                    .event_signature(signature.selector);

                let stream = provider
                    .subscribe_logs(&filter)
                    .await
                    .map_err(|e| ListenerError::SubscribeFailed {
                        contract: format!("{address:?}"),
                        signature: raw_signature.clone(),
                        reason: e.to_string(),
                    })?
                    .into_stream();

                debug!(
                    "Watching {:?} for '{}' (subscription '{}')",
                    address, raw_signature, subscription.id
                );

                watchers.push(self.spawn_watcher(
                    subscription.clone(),
                    *address,
                    signature,
                    stream,
                ));
            }
        }
        Ok(watchers)
    }

    fn spawn_watcher(
        &self,
        subscription: Arc<Subscription>,
        address: Address,
        signature: EventSignature,
        mut stream: impl futures::Stream<Item = alloy::rpc::types::Log> + Unpin + Send + 'static,
    ) -> JoinHandle<()> {
        let signals = self.signals.clone();
        tokio::spawn(async move {
            while let Some(log) = stream.next().await {
                match normalize_log(&log, &signature) {
                    Ok(event) => {
                        debug!(
                            "Event '{}' at block {} from {:?} (subscription '{}')",
                            event.event_name, event.block_number, address, subscription.id
                        );
                        if signals
                            .send(ListenerSignal::Event(subscription.clone(), event))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(
                            "Failed to normalize log for subscription '{}': {e}",
                            subscription.id
                        );
                        let _ = signals
                            .send(ListenerSignal::EventError {
                                subscription_id: subscription.id.clone(),
                                error: e.to_string(),
                            })
                            .await;
                    }
                }
            }
            debug!(
                "Log stream ended for {:?} (subscription '{}')",
                address, subscription.id
            );
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{WebhookConfig, WebhookFormat};
    use alloy::primitives::address;
    use std::collections::HashMap as StdHashMap;

    fn test_subscription(id: &str) -> Arc<Subscription> {
        Arc::new(Subscription {
            id: id.to_string(),
            name: format!("sub {id}"),
            contract_addresses: vec![address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48")],
            event_signatures: vec!["Transfer(address,address,uint256)".to_string()],
            filters: StdHashMap::new(),
            webhooks: vec![WebhookConfig {
                id: "wh-1".to_string(),
                url: "https://hooks.example.com/abc".to_string(),
                format: WebhookFormat::Generic,
                headers: StdHashMap::new(),
                timeout_ms: 30_000,
                retry_attempts: 3,
            }],
        })
    }

    #[tokio::test]
    async fn register_without_connection_defers_watchers() {
        let connection = ChainConnection::new("ws://localhost:8546").unwrap();
        let (listener, _rx) = EventListener::new(connection);

        listener.register(test_subscription("s1")).await.unwrap();
        assert_eq!(listener.subscription_count().await, 1);
    }

    #[tokio::test]
    async fn unregister_unknown_id_is_noop() {
        let connection = ChainConnection::new("ws://localhost:8546").unwrap();
        let (listener, _rx) = EventListener::new(connection);

        assert!(!listener.unregister("nope").await);
        listener.register(test_subscription("s1")).await.unwrap();
        assert!(listener.unregister("s1").await);
        assert_eq!(listener.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn reregistering_replaces_the_entry() {
        let connection = ChainConnection::new("ws://localhost:8546").unwrap();
        let (listener, _rx) = EventListener::new(connection);

        listener.register(test_subscription("s1")).await.unwrap();
        listener.register(test_subscription("s1")).await.unwrap();
        assert_eq!(listener.subscription_count().await, 1);
    }

    #[tokio::test]
    async fn reattach_replaces_watchers_without_duplicates() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct DropCounter(Arc<AtomicUsize>);
        impl Drop for DropCounter {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn fake_watchers(n: usize, dropped: &Arc<AtomicUsize>) -> Vec<JoinHandle<()>> {
            (0..n)
                .map(|_| {
                    let guard = DropCounter(dropped.clone());
                    tokio::spawn(async move {
                        let _guard = guard;
                        futures::future::pending::<()>().await;
                    })
                })
                .collect()
        }

        let connection = ChainConnection::new("ws://localhost:8546").unwrap();
        let (listener, _rx) = EventListener::new(connection);
        listener.register(test_subscription("s1")).await.unwrap();

        let dropped = Arc::new(AtomicUsize::new(0));
        listener.install_watchers("s1", fake_watchers(2, &dropped)).await;

        // Reconnect path installs a fresh set; the old one must be aborted,
        // not left running alongside.
        listener.install_watchers("s1", fake_watchers(2, &dropped)).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(dropped.load(Ordering::SeqCst), 2);
        assert_eq!(listener.registry.lock().await["s1"].watchers.len(), 2);

        // Watchers for ids unregistered mid-attach are torn down.
        listener.install_watchers("ghost", fake_watchers(1, &dropped)).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(dropped.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn watcher_signal_carries_normalized_event() {
        // Exercise the watcher task directly with a synthetic log stream.
        let connection = ChainConnection::new("ws://localhost:8546").unwrap();
        let (listener, mut rx) = EventListener::new(connection);
        let subscription = test_subscription("s1");

        let signature =
            EventSignature::parse("Transfer(address from,address to,uint256 value)").unwrap();
        let log = alloy::rpc::types::Log {
            inner: alloy::primitives::Log {
                address: address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
                data: alloy::primitives::LogData::new_unchecked(
                    vec![signature.selector],
                    alloy::primitives::Bytes::from(vec![0u8; 96]),
                ),
            },
            block_hash: None,
            block_number: Some(100),
            block_timestamp: None,
            transaction_hash: None,
            transaction_index: None,
            log_index: Some(0),
            removed: false,
        };

        let handle = listener.spawn_watcher(
            subscription.clone(),
            address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
            signature,
            futures::stream::iter(vec![log]),
        );

        match rx.recv().await {
            Some(ListenerSignal::Event(sub, event)) => {
                assert_eq!(sub.id, "s1");
                assert_eq!(event.event_name, "Transfer");
                assert_eq!(event.block_number, 100);
            }
            other => panic!("expected event signal, got {other:?}"),
        }
        let _ = handle.await;
    }
}
