//! Subscriber directory backed by the subscribers table.

use chrono::{DateTime, Utc};
use domain::errors::StoreError;
use domain::models::Subscriber;
use domain::services::SubscriberDirectory;
use sqlx::PgPool;

use crate::entities::SubscriberEntity;
use crate::metrics::QueryTimer;

/// Read-only repository over active subscribers.
#[derive(Clone)]
pub struct SubscriberRepository {
    pool: PgPool,
}

impl SubscriberRepository {
    /// Create a new repository instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SubscriberDirectory for SubscriberRepository {
    async fn list_active_page(
        &self,
        snapshot_at: DateTime<Utc>,
        after_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Subscriber>, StoreError> {
        let timer = QueryTimer::new("subscribers_list_active_page");
        // Keyset pagination keeps pages stable while rows are added or removed.
        let result = sqlx::query_as::<_, SubscriberEntity>(
            r#"
            SELECT id, email
            FROM subscribers
            WHERE is_subscribed = TRUE
              AND subscribed_at <= $1
              AND id > $2
            ORDER BY id ASC
            LIMIT $3
            "#,
        )
        .bind(snapshot_at)
        .bind(after_id.unwrap_or(0))
        .bind(limit)
        .fetch_all(&self.pool)
        .await;
        timer.finish(&result);

        Ok(result?.into_iter().map(Subscriber::from).collect())
    }
}
