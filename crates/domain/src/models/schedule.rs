//! Schedule domain model and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Lifecycle state of a schedule.
///
/// ```text
/// PENDING    -> PROCESSING | CANCELLED
/// PROCESSING -> COMPLETED  | FAILED
/// FAILED     -> PENDING    (only while retries remain)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ScheduleStatus {
    pub const ALL: [ScheduleStatus; 5] = [
        ScheduleStatus::Pending,
        ScheduleStatus::Processing,
        ScheduleStatus::Completed,
        ScheduleStatus::Failed,
        ScheduleStatus::Cancelled,
    ];

    /// Database / wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "pending",
            ScheduleStatus::Processing => "processing",
            ScheduleStatus::Completed => "completed",
            ScheduleStatus::Failed => "failed",
            ScheduleStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// FAILED -> PENDING is structurally allowed here; the retry ceiling is
    /// checked separately by [`crate::services::RetryPolicy`].
    pub fn can_transition_to(&self, next: ScheduleStatus) -> bool {
        use ScheduleStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Failed, Pending)
        )
    }

    /// States that occupy the newsletter's single active slot.
    pub fn is_active(&self) -> bool {
        matches!(self, ScheduleStatus::Pending | ScheduleStatus::Processing)
    }
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScheduleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(ScheduleStatus::Pending),
            "processing" => Ok(ScheduleStatus::Processing),
            "completed" => Ok(ScheduleStatus::Completed),
            "failed" => Ok(ScheduleStatus::Failed),
            "cancelled" => Ok(ScheduleStatus::Cancelled),
            other => Err(format!("unknown schedule status: {}", other)),
        }
    }
}

/// A durable intent to deliver one newsletter at or after `scheduled_for`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Schedule {
    pub id: i64,
    pub newsletter_id: i64,
    pub scheduled_for: DateTime<Utc>,
    pub cron_expression: Option<String>,
    pub status: ScheduleStatus,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub executed_at: Option<DateTime<Utc>>,
    /// Set when the schedule is claimed; used to reclaim stuck runs.
    pub processing_started_at: Option<DateTime<Utc>>,
    /// Set on every FAILED outcome; anchors the retry backoff.
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    /// Due: pending and eligible at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ScheduleStatus::Pending && self.scheduled_for <= now
    }
}

/// Request payload for scheduling a newsletter.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct CreateScheduleRequest {
    #[validate(range(min = 1, message = "newsletter_id must be positive"))]
    pub newsletter_id: i64,

    pub scheduled_for: DateTime<Utc>,

    #[validate(length(min = 1, max = 100, message = "cron_expression must be 1-100 characters"))]
    pub cron_expression: Option<String>,
}

/// Request payload for moving a PENDING schedule. Omitted fields are kept.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct RescheduleRequest {
    pub scheduled_for: Option<DateTime<Utc>>,

    #[validate(length(min = 1, max = 100, message = "cron_expression must be 1-100 characters"))]
    pub cron_expression: Option<String>,
}

impl RescheduleRequest {
    /// At least one field must be supplied.
    pub fn validate_has_changes(&self) -> Result<(), String> {
        if self.scheduled_for.is_none() && self.cron_expression.is_none() {
            return Err("scheduled_for or cron_expression is required".to_string());
        }
        Ok(())
    }
}

/// Query parameters for listing schedules.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct ListSchedulesQuery {
    pub status: Option<ScheduleStatus>,

    #[serde(default)]
    #[validate(range(min = 0, message = "offset must not be negative"))]
    pub offset: i64,

    #[serde(default = "default_list_limit")]
    #[validate(range(min = 1, max = 100, message = "limit must be between 1 and 100"))]
    pub limit: i64,
}

fn default_list_limit() -> i64 {
    50
}

/// Response payload for schedule operations.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ScheduleResponse {
    pub id: i64,
    pub newsletter_id: i64,
    pub scheduled_for: DateTime<Utc>,
    pub cron_expression: Option<String>,
    pub status: ScheduleStatus,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub executed_at: Option<DateTime<Utc>>,
    /// FAILED with no retries left; needs an operator.
    pub retries_exhausted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleResponse {
    pub fn from_schedule(schedule: Schedule, max_retries: i32) -> Self {
        let retries_exhausted =
            schedule.status == ScheduleStatus::Failed && schedule.retry_count >= max_retries;
        Self {
            id: schedule.id,
            newsletter_id: schedule.newsletter_id,
            scheduled_for: schedule.scheduled_for,
            cron_expression: schedule.cron_expression,
            status: schedule.status,
            retry_count: schedule.retry_count,
            error_message: schedule.error_message,
            executed_at: schedule.executed_at,
            retries_exhausted,
            created_at: schedule.created_at,
            updated_at: schedule.updated_at,
        }
    }
}

/// Response for listing schedules.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ListSchedulesResponse {
    pub schedules: Vec<ScheduleResponse>,
    pub offset: i64,
    pub limit: i64,
}
