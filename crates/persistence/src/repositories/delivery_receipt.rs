//! Delivery receipt repository.
//!
//! One row per (schedule, subscriber) that was accepted by the transport.
//! A retried schedule consults these so nobody receives the same issue twice.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use domain::errors::StoreError;
use domain::services::DeliveryReceiptStore;
use sqlx::PgPool;

use crate::metrics::QueryTimer;

/// Repository for per-recipient delivery receipts.
#[derive(Clone)]
pub struct DeliveryReceiptRepository {
    pool: PgPool,
}

impl DeliveryReceiptRepository {
    /// Create a new repository instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl DeliveryReceiptStore for DeliveryReceiptRepository {
    async fn delivered_among(
        &self,
        schedule_id: i64,
        subscriber_ids: &[i64],
    ) -> Result<HashSet<i64>, StoreError> {
        if subscriber_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT subscriber_id
            FROM delivery_receipts
            WHERE schedule_id = $1 AND subscriber_id = ANY($2)
            "#,
        )
        .bind(schedule_id)
        .bind(subscriber_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn record_delivered(
        &self,
        schedule_id: i64,
        subscriber_ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        if subscriber_ids.is_empty() {
            return Ok(0);
        }

        let timer = QueryTimer::new("delivery_receipts_record");
        let result = sqlx::query(
            r#"
            INSERT INTO delivery_receipts (schedule_id, subscriber_id, delivered_at)
            SELECT $1, subscriber_id, $3
            FROM UNNEST($2::bigint[]) AS t(subscriber_id)
            ON CONFLICT (schedule_id, subscriber_id) DO NOTHING
            "#,
        )
        .bind(schedule_id)
        .bind(subscriber_ids)
        .bind(now)
        .execute(&self.pool)
        .await;
        timer.finish(&result);

        Ok(result?.rows_affected())
    }
}
