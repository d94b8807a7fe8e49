//! Newsletter repository.

use chrono::{DateTime, Utc};
use domain::errors::StoreError;
use domain::models::Newsletter;
use domain::services::NewsletterStore;
use sqlx::PgPool;

use crate::entities::NewsletterEntity;

/// Repository for newsletter content lookups.
#[derive(Clone)]
pub struct NewsletterRepository {
    pool: PgPool,
}

impl NewsletterRepository {
    /// Create a new repository instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl NewsletterStore for NewsletterRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<Newsletter>, StoreError> {
        let entity = sqlx::query_as::<_, NewsletterEntity>(
            r#"
            SELECT id, title, subject, content_html, content_text, status, sent_at
            FROM newsletters
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        entity.map(Newsletter::try_from).transpose()
    }

    async fn mark_sent(&self, id: i64, now: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE newsletters
            SET status = 'sent', sent_at = $2, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("newsletter {}", id)));
        }
        Ok(())
    }
}
