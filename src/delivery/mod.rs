//! Durable webhook delivery: queue, circuit breakers, sender, tracker,
//! and the dead-letter store for exhausted deliveries.

pub mod circuit;
pub mod dead_letter;
pub mod error;
pub mod formatters;
pub mod queue;
pub mod sender;
pub mod store;
pub mod tracker;

pub use circuit::{CircuitBreakerManager, CircuitConfig, CircuitState};
pub use dead_letter::{CleanupManager, DeadLetterConfig, DeadLetterQueue};
pub use error::DeliveryError;
pub use queue::{DeliveryQueue, QueueConfig};
pub use sender::{validate_webhook_config, ValidationResult, WebhookSender};
pub use store::{
    DeadLetterStats, DeadLetterStore, DeliveryStore, MemoryDeadLetterStore, MemoryDeliveryStore,
    QueueStats,
};
pub use tracker::{DeliveryResult, DeliveryStats, DeliveryTracker};
