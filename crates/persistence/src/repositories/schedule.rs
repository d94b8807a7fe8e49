//! Schedule repository.
//!
//! Every state transition is a single guarded `UPDATE ... WHERE status = ...`,
//! so concurrent schedulers race on the row lock and at most one of them sees
//! a returned row.

use chrono::{DateTime, Utc};
use domain::errors::StoreError;
use domain::models::{Schedule, ScheduleStatus};
use domain::services::{NewSchedule, RetryPolicy, ScheduleStore};
use sqlx::PgPool;

use crate::entities::{ScheduleEntity, SCHEDULE_COLUMNS};
use crate::metrics::QueryTimer;

/// Repository for schedule operations.
#[derive(Clone)]
pub struct ScheduleRepository {
    pool: PgPool,
}

impl ScheduleRepository {
    /// Create a new repository instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn into_domain(entity: Option<ScheduleEntity>) -> Result<Option<Schedule>, StoreError> {
    entity.map(Schedule::try_from).transpose()
}

fn into_domain_vec(entities: Vec<ScheduleEntity>) -> Result<Vec<Schedule>, StoreError> {
    entities.into_iter().map(Schedule::try_from).collect()
}

#[async_trait::async_trait]
impl ScheduleStore for ScheduleRepository {
    async fn create(&self, new: NewSchedule) -> Result<Schedule, StoreError> {
        let timer = QueryTimer::new("schedules_create");
        let result = sqlx::query_as::<_, ScheduleEntity>(&format!(
            r#"
            INSERT INTO schedules (newsletter_id, scheduled_for, cron_expression, status, retry_count)
            VALUES ($1, $2, $3, 'pending', 0)
            RETURNING {SCHEDULE_COLUMNS}
            "#
        ))
        .bind(new.newsletter_id)
        .bind(new.scheduled_for)
        .bind(new.cron_expression)
        .fetch_one(&self.pool)
        .await;
        timer.finish(&result);

        Schedule::try_from(result?)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Schedule>, StoreError> {
        let entity = sqlx::query_as::<_, ScheduleEntity>(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        into_domain(entity)
    }

    async fn list(
        &self,
        status: Option<ScheduleStatus>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Schedule>, StoreError> {
        let entities = sqlx::query_as::<_, ScheduleEntity>(&format!(
            r#"
            SELECT {SCHEDULE_COLUMNS}
            FROM schedules
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY scheduled_for ASC, id ASC
            OFFSET $2
            LIMIT $3
            "#
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        into_domain_vec(entities)
    }

    async fn cancel(&self, id: i64) -> Result<Option<Schedule>, StoreError> {
        let entity = sqlx::query_as::<_, ScheduleEntity>(&format!(
            r#"
            UPDATE schedules
            SET status = 'cancelled', updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING {SCHEDULE_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        into_domain(entity)
    }

    async fn reschedule(
        &self,
        id: i64,
        scheduled_for: Option<DateTime<Utc>>,
        cron_expression: Option<String>,
    ) -> Result<Option<Schedule>, StoreError> {
        let entity = sqlx::query_as::<_, ScheduleEntity>(&format!(
            r#"
            UPDATE schedules
            SET scheduled_for = COALESCE($2, scheduled_for),
                cron_expression = COALESCE($3, cron_expression),
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING {SCHEDULE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(scheduled_for)
        .bind(cron_expression)
        .fetch_optional(&self.pool)
        .await?;

        into_domain(entity)
    }

    async fn find_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Schedule>, StoreError> {
        let timer = QueryTimer::new("schedules_find_due");
        let result = sqlx::query_as::<_, ScheduleEntity>(&format!(
            r#"
            SELECT {SCHEDULE_COLUMNS}
            FROM schedules
            WHERE status = 'pending'
              AND scheduled_for <= $1
            ORDER BY scheduled_for ASC, id ASC
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await;
        timer.finish(&result);

        into_domain_vec(result?)
    }

    async fn claim(&self, id: i64, now: DateTime<Utc>) -> Result<Option<Schedule>, StoreError> {
        let timer = QueryTimer::new("schedules_claim");
        let result = sqlx::query_as::<_, ScheduleEntity>(&format!(
            r#"
            UPDATE schedules
            SET status = 'processing',
                processing_started_at = $2,
                updated_at = $2
            WHERE id = $1
              AND status = 'pending'
              AND scheduled_for <= $2
            RETURNING {SCHEDULE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await;
        timer.finish(&result);

        into_domain(result?)
    }

    async fn mark_completed(
        &self,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<Schedule>, StoreError> {
        let entity = sqlx::query_as::<_, ScheduleEntity>(&format!(
            r#"
            UPDATE schedules
            SET status = 'completed',
                executed_at = COALESCE(executed_at, $2),
                error_message = NULL,
                updated_at = $2
            WHERE id = $1 AND status = 'processing'
            RETURNING {SCHEDULE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        into_domain(entity)
    }

    async fn mark_failed(
        &self,
        id: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Schedule>, StoreError> {
        let entity = sqlx::query_as::<_, ScheduleEntity>(&format!(
            r#"
            UPDATE schedules
            SET status = 'failed',
                error_message = $2,
                retry_count = retry_count + 1,
                failed_at = $3,
                updated_at = $3
            WHERE id = $1 AND status = 'processing'
            RETURNING {SCHEDULE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(reason)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        into_domain(entity)
    }

    async fn reclaim_stale(
        &self,
        cutoff: DateTime<Utc>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Schedule>, StoreError> {
        let entities = sqlx::query_as::<_, ScheduleEntity>(&format!(
            r#"
            UPDATE schedules
            SET status = 'failed',
                error_message = $2,
                retry_count = retry_count + 1,
                failed_at = $3,
                updated_at = $3
            WHERE status = 'processing'
              AND (processing_started_at IS NULL OR processing_started_at < $1)
            RETURNING {SCHEDULE_COLUMNS}
            "#
        ))
        .bind(cutoff)
        .bind(reason)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        into_domain_vec(entities)
    }

    async fn find_retry_candidates(
        &self,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Schedule>, StoreError> {
        let timer = QueryTimer::new("schedules_find_retry_candidates");
        // Backoff step for retry_count n is backoff[min(max(n, 1), len)]; the
        // last step repeats and an empty list means no wait.
        let result = sqlx::query_as::<_, ScheduleEntity>(&format!(
            r#"
            WITH candidates AS (
                SELECT s.*,
                       s.failed_at + make_interval(secs => GREATEST(COALESCE(
                           ($2::bigint[])[LEAST(GREATEST(s.retry_count, 1), cardinality($2::bigint[]))],
                           0
                       ), 0)::double precision) AS next_attempt_at
                FROM schedules s
                WHERE s.status = 'failed'
                  AND s.retry_count < $1
                  AND NOT EXISTS (
                      SELECT 1 FROM schedules other
                      WHERE other.newsletter_id = s.newsletter_id
                        AND other.id <> s.id
                        AND other.status IN ('pending', 'processing')
                  )
            )
            SELECT {SCHEDULE_COLUMNS}
            FROM candidates
            WHERE next_attempt_at IS NULL OR next_attempt_at <= $3
            ORDER BY failed_at ASC NULLS FIRST, id ASC
            LIMIT $4
            "#
        ))
        .bind(policy.max_retries())
        .bind(policy.backoff_secs().to_vec())
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await;
        timer.finish(&result);

        into_domain_vec(result?)
    }

    async fn requeue(&self, id: i64, max_retries: i32) -> Result<Option<Schedule>, StoreError> {
        let result = sqlx::query_as::<_, ScheduleEntity>(&format!(
            r#"
            UPDATE schedules s
            SET status = 'pending',
                processing_started_at = NULL,
                updated_at = NOW()
            WHERE s.id = $1
              AND s.status = 'failed'
              AND s.retry_count < $2
              AND NOT EXISTS (
                  SELECT 1 FROM schedules other
                  WHERE other.newsletter_id = s.newsletter_id
                    AND other.id <> s.id
                    AND other.status IN ('pending', 'processing')
              )
            RETURNING {SCHEDULE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(max_retries)
        .fetch_optional(&self.pool)
        .await;

        match result.map_err(StoreError::from) {
            Ok(entity) => into_domain(entity),
            // Lost a race with another writer for the newsletter's active slot.
            Err(StoreError::Conflict(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
