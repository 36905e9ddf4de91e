//! Dead-letter persistence on PostgreSQL

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use super::models::DeadLetterRow;
use crate::delivery::error::{DeliveryError, Result};
use crate::delivery::store::{DeadLetterStats, DeadLetterStore};
use crate::types::DeadLetterEntry;

pub struct DeadLetterRepository {
    pool: PgPool,
}

impl DeadLetterRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn storage(e: sqlx::Error) -> DeliveryError {
    DeliveryError::Storage(e.to_string())
}

const COLUMNS: &str = "id, subscription_id, webhook_id, event_data, payload, failure_reason, failed_at, attempts, last_error";

fn parse_rows(rows: Vec<DeadLetterRow>) -> Vec<DeadLetterEntry> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id;
            match row.into_entry() {
                Ok(entry) => Some(entry),
                Err(e) => {
                    error!("Skipping unparsable dead-letter row {id}: {e:#}");
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl DeadLetterStore for DeadLetterRepository {
    async fn insert(&self, entry: &DeadLetterEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dead_letter_queue
                (id, subscription_id, webhook_id, event_data, payload,
                 failure_reason, failed_at, attempts, last_error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.subscription_id)
        .bind(&entry.webhook_id)
        .bind(serde_json::to_value(&entry.event)?)
        .bind(&entry.payload)
        .bind(&entry.failure_reason)
        .bind(entry.failed_at)
        .bind(entry.attempts as i32)
        .bind(&entry.last_error)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<DeadLetterEntry>> {
        let rows = sqlx::query_as::<_, DeadLetterRow>(&format!(
            "SELECT {COLUMNS} FROM dead_letter_queue ORDER BY failed_at DESC LIMIT $1 OFFSET $2"
        ))
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        Ok(parse_rows(rows))
    }

    async fn list_for_webhook(
        &self,
        webhook_id: &str,
        limit: usize,
    ) -> Result<Vec<DeadLetterEntry>> {
        let rows = sqlx::query_as::<_, DeadLetterRow>(&format!(
            "SELECT {COLUMNS} FROM dead_letter_queue WHERE webhook_id = $1 ORDER BY failed_at DESC LIMIT $2"
        ))
        .bind(webhook_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        Ok(parse_rows(rows))
    }

    async fn remove(&self, id: Uuid) -> Result<Option<DeadLetterEntry>> {
        let row = sqlx::query_as::<_, DeadLetterRow>(&format!(
            "DELETE FROM dead_letter_queue WHERE id = $1 RETURNING {COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        match row {
            Some(row) => Ok(Some(
                row.into_entry()
                    .map_err(|e| DeliveryError::Storage(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    async fn stats(&self) -> Result<DeadLetterStats> {
        let now = Utc::now();
        let (total, last_24h, last_7d): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE failed_at >= $1),
                   COUNT(*) FILTER (WHERE failed_at >= $2)
            FROM dead_letter_queue
            "#,
        )
        .bind(now - Duration::hours(24))
        .bind(now - Duration::days(7))
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;

        let top_reasons: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT failure_reason, COUNT(*) AS n
            FROM dead_letter_queue
            GROUP BY failure_reason
            ORDER BY n DESC, failure_reason
            LIMIT 5
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        Ok(DeadLetterStats {
            total: total.max(0) as u64,
            last_24h: last_24h.max(0) as u64,
            last_7d: last_7d.max(0) as u64,
            top_reasons: top_reasons
                .into_iter()
                .map(|(reason, n)| (reason, n.max(0) as u64))
                .collect(),
        })
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM dead_letter_queue WHERE failed_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected())
    }
}
