//! Subscription persistence on PostgreSQL

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, error};

use super::models::{SubscriptionRow, WebhookRow};
use crate::processor::store::{StoreError, SubscriptionStore};
use crate::types::Subscription;

pub struct SubscriptionRepository {
    pool: PgPool,
}

impl SubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionStore for SubscriptionRepository {
    /// Upserts the subscription row and each webhook row in one
    /// transaction. Webhooks no longer referenced are deactivated.
    async fn upsert(&self, subscription: &Subscription) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        sqlx::query(
            r#"
            INSERT INTO subscriptions (id, name, contract_addresses, event_signatures, filters, active)
            VALUES ($1, $2, $3, $4, $5, TRUE)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                contract_addresses = EXCLUDED.contract_addresses,
                event_signatures = EXCLUDED.event_signatures,
                filters = EXCLUDED.filters,
                active = TRUE,
                updated_at = NOW()
            "#,
        )
        .bind(&subscription.id)
        .bind(&subscription.name)
        .bind(serde_json::to_value(&subscription.contract_addresses)?)
        .bind(serde_json::to_value(&subscription.event_signatures)?)
        .bind(serde_json::to_value(&subscription.filters)?)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to upsert subscription '{}'", subscription.id))?;

        sqlx::query("UPDATE webhooks SET active = FALSE WHERE subscription_id = $1")
            .bind(&subscription.id)
            .execute(&mut *tx)
            .await
            .context("Failed to deactivate stale webhooks")?;

        for webhook in &subscription.webhooks {
            sqlx::query(
                r#"
                INSERT INTO webhooks (id, subscription_id, url, format, headers, timeout_ms, retry_attempts, active)
                VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE)
                ON CONFLICT (id) DO UPDATE SET
                    subscription_id = EXCLUDED.subscription_id,
                    url = EXCLUDED.url,
                    format = EXCLUDED.format,
                    headers = EXCLUDED.headers,
                    timeout_ms = EXCLUDED.timeout_ms,
                    retry_attempts = EXCLUDED.retry_attempts,
                    active = TRUE
                "#,
            )
            .bind(&webhook.id)
            .bind(&subscription.id)
            .bind(&webhook.url)
            .bind(webhook.format.to_string())
            .bind(serde_json::to_value(&webhook.headers)?)
            .bind(webhook.timeout_ms as i64)
            .bind(webhook.retry_attempts as i32)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to upsert webhook '{}'", webhook.id))?;
        }

        tx.commit().await.context("Failed to commit subscription")?;
        debug!("Persisted subscription '{}'", subscription.id);
        Ok(())
    }

    async fn remove(&self, subscription_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE subscriptions SET active = FALSE, updated_at = NOW() WHERE id = $1 AND active")
            .bind(subscription_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to remove subscription '{subscription_id}'"))?;
        Ok(result.rows_affected() > 0)
    }

    /// Loads every active subscription with its active webhooks. Rows whose
    /// JSON no longer parses are skipped individually.
    async fn load_all(&self) -> Result<Vec<Subscription>, StoreError> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            "SELECT id, name, contract_addresses, event_signatures, filters, active
             FROM subscriptions WHERE active ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load subscriptions")?;

        let mut subscriptions = Vec::with_capacity(rows.len());
        for row in rows {
            let webhooks = sqlx::query_as::<_, WebhookRow>(
                "SELECT id, subscription_id, url, format, headers, timeout_ms, retry_attempts, active
                 FROM webhooks WHERE subscription_id = $1 AND active",
            )
            .bind(&row.id)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to load webhooks for subscription '{}'", row.id))?;

            let id = row.id.clone();
            match row.into_subscription(webhooks) {
                Ok(subscription) => subscriptions.push(subscription),
                Err(e) => error!("Skipping unparsable subscription row '{id}': {e:#}"),
            }
        }
        Ok(subscriptions)
    }
}
