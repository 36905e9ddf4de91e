//! Subscription persistence abstraction

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::types::Subscription;

pub type StoreError = anyhow::Error;

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Inserts or replaces a subscription and its webhooks.
    async fn upsert(&self, subscription: &Subscription) -> Result<(), StoreError>;

    /// Removes a subscription. Returns false when the id was unknown.
    async fn remove(&self, subscription_id: &str) -> Result<bool, StoreError>;

    /// Loads every active subscription.
    async fn load_all(&self) -> Result<Vec<Subscription>, StoreError>;
}

/// In-memory subscription store for tests and storage-free runs.
#[derive(Default)]
pub struct MemorySubscriptionStore {
    subscriptions: Mutex<Vec<Subscription>>,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(seed: Vec<Subscription>) -> Self {
        Self {
            subscriptions: Mutex::new(seed),
        }
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn upsert(&self, subscription: &Subscription) -> Result<(), StoreError> {
        let mut subscriptions = self.subscriptions.lock().await;
        subscriptions.retain(|s| s.id != subscription.id);
        subscriptions.push(subscription.clone());
        Ok(())
    }

    async fn remove(&self, subscription_id: &str) -> Result<bool, StoreError> {
        let mut subscriptions = self.subscriptions.lock().await;
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != subscription_id);
        Ok(subscriptions.len() < before)
    }

    async fn load_all(&self) -> Result<Vec<Subscription>, StoreError> {
        Ok(self.subscriptions.lock().await.clone())
    }
}
