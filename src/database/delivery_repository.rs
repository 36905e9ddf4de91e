//! Delivery queue persistence on PostgreSQL
//!
//! The claim uses `FOR UPDATE SKIP LOCKED` so concurrent dispatchers (or a
//! future multi-process deployment) never hand the same delivery to two
//! workers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use super::models::DeliveryRow;
use crate::delivery::error::{DeliveryError, Result};
use crate::delivery::store::{DeliveryStore, QueueStats};
use crate::types::WebhookDelivery;

pub struct DeliveryRepository {
    pool: PgPool,
}

impl DeliveryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn storage(e: sqlx::Error) -> DeliveryError {
    DeliveryError::Storage(e.to_string())
}

#[async_trait]
impl DeliveryStore for DeliveryRepository {
    async fn enqueue(&self, delivery: &WebhookDelivery) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO delivery_queue
                (id, subscription_id, webhook_id, event_data, payload,
                 attempts, max_attempts, status, next_retry_at, last_error, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(delivery.id)
        .bind(&delivery.subscription_id)
        .bind(&delivery.webhook_id)
        .bind(serde_json::to_value(&delivery.event)?)
        .bind(&delivery.payload)
        .bind(delivery.attempts as i32)
        .bind(delivery.max_attempts as i32)
        .bind(delivery.status.to_string())
        .bind(delivery.next_retry_at)
        .bind(&delivery.last_error)
        .bind(delivery.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn claim_batch(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<WebhookDelivery>> {
        let rows = sqlx::query_as::<_, DeliveryRow>(
            r#"
            UPDATE delivery_queue SET status = 'processing', updated_at = NOW()
            WHERE id IN (
                SELECT id FROM delivery_queue
                WHERE status = 'pending'
                  AND (next_retry_at IS NULL OR next_retry_at <= $1)
                ORDER BY created_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, subscription_id, webhook_id, event_data, payload,
                      attempts, max_attempts, status, next_retry_at, last_error, created_at
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            match row.into_delivery() {
                Ok(delivery) => claimed.push(delivery),
                Err(e) => {
                    // Unparsable rows would wedge the queue if left pending.
                    error!("Failing unparsable delivery row {id}: {e:#}");
                    sqlx::query(
                        "UPDATE delivery_queue SET status = 'failed', last_error = $2, updated_at = NOW() WHERE id = $1",
                    )
                    .bind(id)
                    .bind(format!("unparsable row: {e}"))
                    .execute(&self.pool)
                    .await
                    .map_err(storage)?;
                }
            }
        }
        Ok(claimed)
    }

    async fn mark_completed(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE delivery_queue SET status = 'completed', next_retry_at = NULL, last_error = NULL, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: Uuid,
        attempts: u32,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE delivery_queue
            SET status = 'pending', attempts = $2, next_retry_at = $3, last_error = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempts as i32)
        .bind(next_retry_at)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, attempts: u32, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE delivery_queue
            SET status = 'failed', attempts = $2, next_retry_at = NULL, last_error = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempts as i32)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM delivery_queue GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            let count = count.max(0) as u64;
            match status.as_str() {
                "pending" => stats.pending = count,
                "processing" => stats.processing = count,
                "completed" => stats.completed = count,
                "failed" => stats.failed = count,
                _ => {}
            }
        }
        Ok(stats)
    }

    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM delivery_queue WHERE status IN ('completed', 'failed') AND created_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(result.rows_affected())
    }
}
