//! Analytics repository.
//!
//! Increments run inside one transaction holding the row lock, so concurrent
//! writers for the same newsletter are serialized and no update is lost.

use domain::errors::StoreError;
use domain::models::{Analytics, EventType, RateBasis};
use domain::services::AnalyticsStore;
use sqlx::PgPool;

use crate::entities::{AnalyticsEntity, ANALYTICS_COLUMNS};
use crate::metrics::QueryTimer;

/// Repository for per-newsletter analytics rows.
#[derive(Clone)]
pub struct AnalyticsRepository {
    pool: PgPool,
}

impl AnalyticsRepository {
    /// Create a new repository instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create-if-absent, lock, apply, write back; one transaction.
    async fn apply_locked(
        &self,
        newsletter_id: i64,
        deltas: &[(EventType, i64)],
        basis: RateBasis,
    ) -> Result<Analytics, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO analytics (newsletter_id)
            VALUES ($1)
            ON CONFLICT (newsletter_id) DO NOTHING
            "#,
        )
        .bind(newsletter_id)
        .execute(&mut *tx)
        .await?;

        let current = sqlx::query_as::<_, AnalyticsEntity>(&format!(
            "SELECT {ANALYTICS_COLUMNS} FROM analytics WHERE newsletter_id = $1 FOR UPDATE"
        ))
        .bind(newsletter_id)
        .fetch_one(&mut *tx)
        .await?;

        let mut analytics = Analytics::from(current);
        analytics.apply(deltas, basis);

        let updated = sqlx::query_as::<_, AnalyticsEntity>(&format!(
            r#"
            UPDATE analytics
            SET total_sent = $2,
                total_delivered = $3,
                total_opened = $4,
                total_clicked = $5,
                total_bounced = $6,
                total_unsubscribed = $7,
                open_rate = $8,
                click_rate = $9,
                bounce_rate = $10,
                updated_at = NOW()
            WHERE newsletter_id = $1
            RETURNING {ANALYTICS_COLUMNS}
            "#
        ))
        .bind(newsletter_id)
        .bind(analytics.total_sent)
        .bind(analytics.total_delivered)
        .bind(analytics.total_opened)
        .bind(analytics.total_clicked)
        .bind(analytics.total_bounced)
        .bind(analytics.total_unsubscribed)
        .bind(analytics.open_rate)
        .bind(analytics.click_rate)
        .bind(analytics.bounce_rate)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Analytics::from(updated))
    }
}

#[async_trait::async_trait]
impl AnalyticsStore for AnalyticsRepository {
    async fn find(&self, newsletter_id: i64) -> Result<Option<Analytics>, StoreError> {
        let entity = sqlx::query_as::<_, AnalyticsEntity>(&format!(
            "SELECT {ANALYTICS_COLUMNS} FROM analytics WHERE newsletter_id = $1"
        ))
        .bind(newsletter_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entity.map(Analytics::from))
    }

    async fn apply_deltas(
        &self,
        newsletter_id: i64,
        deltas: &[(EventType, i64)],
        basis: RateBasis,
    ) -> Result<Analytics, StoreError> {
        let timer = QueryTimer::new("analytics_apply_deltas");
        let result = self.apply_locked(newsletter_id, deltas, basis).await;
        timer.finish(&result);
        result
    }
}
