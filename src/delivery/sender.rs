//! Webhook HTTP sender
//!
//! Performs exactly one POST per call. Retry policy lives in the delivery
//! queue; the sender's contract is narrower: validate the config, format
//! the payload, make the request, and always report the outcome to the
//! tracker before returning. `send_webhook` never panics and never returns
//! an error type, every failure mode becomes a failure [`DeliveryResult`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

use super::error::Result;
use super::formatters::format_payload;
use super::tracker::{DeliveryResult, DeliveryTracker};
use crate::constants::delivery::{MAX_WEBHOOK_RETRY_ATTEMPTS, MAX_WEBHOOK_TIMEOUT_MS};
use crate::metrics;
use crate::types::{WebhookConfig, WebhookDelivery};

/// Outcome of structural webhook-config validation. All violations are
/// collected so the caller sees every problem at once.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Structural validation of a webhook configuration.
pub fn validate_webhook_config(config: &WebhookConfig) -> ValidationResult {
    let mut errors = Vec::new();

    match Url::parse(&config.url) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        Ok(url) => errors.push(format!(
            "URL scheme '{}' is not http or https",
            url.scheme()
        )),
        Err(e) => errors.push(format!("URL '{}' is not a valid absolute URL: {e}", config.url)),
    }

    if config.timeout_ms == 0 {
        errors.push("Timeout must be a positive number of milliseconds".to_string());
    } else if config.timeout_ms > MAX_WEBHOOK_TIMEOUT_MS {
        errors.push(format!(
            "Timeout {}ms exceeds the maximum of {}ms",
            config.timeout_ms, MAX_WEBHOOK_TIMEOUT_MS
        ));
    }

    if config.retry_attempts > MAX_WEBHOOK_RETRY_ATTEMPTS {
        errors.push(format!(
            "Retry attempts {} exceeds the maximum of {}",
            config.retry_attempts, MAX_WEBHOOK_RETRY_ATTEMPTS
        ));
    }

    for name in config.headers.keys() {
        if name.trim().is_empty() {
            errors.push("Header names must be non-blank".to_string());
        }
    }

    ValidationResult {
        valid: errors.is_empty(),
        errors,
    }
}

pub struct WebhookSender {
    client: Client,
    configs: RwLock<HashMap<String, WebhookConfig>>,
    tracker: Arc<DeliveryTracker>,
}

impl WebhookSender {
    pub fn new(tracker: Arc<DeliveryTracker>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("chainrelay/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            configs: RwLock::new(HashMap::new()),
            tracker,
        })
    }

    /// Registers (or replaces) the config the sender uses for a webhook id.
    pub async fn register_webhook(&self, config: WebhookConfig) {
        self.configs.write().await.insert(config.id.clone(), config);
    }

    pub async fn unregister_webhook(&self, webhook_id: &str) {
        self.configs.write().await.remove(webhook_id);
    }

    pub async fn webhook_config(&self, webhook_id: &str) -> Option<WebhookConfig> {
        self.configs.read().await.get(webhook_id).cloned()
    }

    /// Sends one delivery attempt. The outcome is reported to the tracker
    /// before this returns, including the no-HTTP failure paths.
    pub async fn send_webhook(&self, delivery: &WebhookDelivery) -> DeliveryResult {
        let result = match self.webhook_config(&delivery.webhook_id).await {
            None => {
                warn!(
                    "No configuration for webhook '{}', failing delivery {} without a request",
                    delivery.webhook_id, delivery.id
                );
                DeliveryResult::failure(
                    format!("no configuration for webhook '{}'", delivery.webhook_id),
                    None,
                    0,
                )
            }
            Some(config) => {
                let validation = validate_webhook_config(&config);
                if !validation.valid {
                    DeliveryResult::failure(
                        format!("invalid webhook configuration: {}", validation.errors.join("; ")),
                        None,
                        0,
                    )
                } else {
                    self.post(&config, delivery).await
                }
            }
        };

        metrics::record_delivery_attempt(&delivery.webhook_id, result.success);
        self.tracker.track_delivery(delivery, result.clone()).await;
        result
    }

    /// The payload is re-formatted from the event at send time so format
    /// changes apply to queued retries; the stored payload is the fallback
    /// for entries whose event data predates the current schema.
    async fn post(&self, config: &WebhookConfig, delivery: &WebhookDelivery) -> DeliveryResult {
        let payload = if delivery.event.event_name.is_empty() {
            delivery.payload.clone()
        } else {
            format_payload(&delivery.event, config.format)
        };

        let mut request = self
            .client
            .post(&config.url)
            .timeout(Duration::from_millis(config.timeout_ms))
            .json(&payload);
        for (name, value) in &config.headers {
            request = request.header(name, value);
        }

        debug!(
            "POST {} for delivery {} (attempt {}/{})",
            config.url,
            delivery.id,
            delivery.attempts + 1,
            delivery.max_attempts.max(1)
        );

        let started = Instant::now();
        match request.send().await {
            Ok(response) => {
                let elapsed = started.elapsed().as_millis() as u64;
                let status = response.status();
                metrics::record_delivery_response_time(&delivery.webhook_id, started.elapsed());
                if status.is_success() {
                    DeliveryResult::success(status.as_u16(), elapsed)
                } else {
                    DeliveryResult::failure(
                        format!("webhook responded with status {status}"),
                        Some(status.as_u16()),
                        elapsed,
                    )
                }
            }
            Err(e) => {
                let elapsed = started.elapsed().as_millis() as u64;
                let reason = if e.is_timeout() {
                    format!("request timed out after {}ms", config.timeout_ms)
                } else {
                    e.to_string()
                };
                DeliveryResult::failure(reason, e.status().map(|s| s.as_u16()), elapsed)
            }
        }
    }
}
