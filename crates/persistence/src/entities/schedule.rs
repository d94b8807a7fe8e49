//! Schedule entity definitions.
//!
//! Maps to the schedules table.

use chrono::{DateTime, Utc};
use domain::errors::StoreError;
use domain::models::{Schedule, ScheduleStatus};
use sqlx::FromRow;

/// Column list shared by every schedule query.
pub const SCHEDULE_COLUMNS: &str = "id, newsletter_id, scheduled_for, cron_expression, status, \
     retry_count, error_message, executed_at, processing_started_at, failed_at, created_at, \
     updated_at";

/// Database entity for the schedules table.
#[derive(Debug, Clone, FromRow)]
pub struct ScheduleEntity {
    pub id: i64,
    pub newsletter_id: i64,
    pub scheduled_for: DateTime<Utc>,
    pub cron_expression: Option<String>,
    pub status: String,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub executed_at: Option<DateTime<Utc>>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ScheduleEntity> for Schedule {
    type Error = StoreError;

    fn try_from(entity: ScheduleEntity) -> Result<Self, Self::Error> {
        let status: ScheduleStatus = entity.status.parse().map_err(StoreError::Database)?;
        Ok(Schedule {
            id: entity.id,
            newsletter_id: entity.newsletter_id,
            scheduled_for: entity.scheduled_for,
            cron_expression: entity.cron_expression,
            status,
            retry_count: entity.retry_count,
            error_message: entity.error_message,
            executed_at: entity.executed_at,
            processing_started_at: entity.processing_started_at,
            failed_at: entity.failed_at,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        })
    }
}
