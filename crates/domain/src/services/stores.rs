//! Store seams used by the scheduler and the delivery engine.
//!
//! Every handle is passed in explicitly; nothing reaches for a process-wide
//! connection. PostgreSQL implementations live in the persistence crate and
//! [`super::memory::InMemoryStore`] implements all of them for tests.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use super::retry_policy::RetryPolicy;
use crate::errors::StoreError;
use crate::models::{Analytics, EventType, Newsletter, RateBasis, Schedule, ScheduleStatus, Subscriber};

/// Fields supplied when a schedule is created.
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub newsletter_id: i64,
    pub scheduled_for: DateTime<Utc>,
    pub cron_expression: Option<String>,
}

/// Durable schedule rows and their guarded state transitions.
///
/// Transition methods are compare-and-set: they return `None` when the row
/// was not in the expected source state, and never move a row otherwise.
#[async_trait::async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Insert a PENDING schedule. Fails with `Conflict` when the newsletter
    /// already has a PENDING or PROCESSING schedule.
    async fn create(&self, new: NewSchedule) -> Result<Schedule, StoreError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Schedule>, StoreError>;

    /// Ordered by `scheduled_for, id`.
    async fn list(
        &self,
        status: Option<ScheduleStatus>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Schedule>, StoreError>;

    /// PENDING -> CANCELLED.
    async fn cancel(&self, id: i64) -> Result<Option<Schedule>, StoreError>;

    /// Move a PENDING schedule. `None` fields keep their current value.
    async fn reschedule(
        &self,
        id: i64,
        scheduled_for: Option<DateTime<Utc>>,
        cron_expression: Option<String>,
    ) -> Result<Option<Schedule>, StoreError>;

    /// PENDING schedules with `scheduled_for <= now`, earliest first, ties by id.
    async fn find_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Schedule>, StoreError>;

    /// PENDING -> PROCESSING, only if still due at `now`. At most one caller wins.
    async fn claim(&self, id: i64, now: DateTime<Utc>) -> Result<Option<Schedule>, StoreError>;

    /// PROCESSING -> COMPLETED. `executed_at` is set only if it was never set.
    async fn mark_completed(
        &self,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<Schedule>, StoreError>;

    /// PROCESSING -> FAILED, incrementing `retry_count`.
    async fn mark_failed(
        &self,
        id: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Schedule>, StoreError>;

    /// PROCESSING rows claimed before `cutoff` -> FAILED, incrementing `retry_count`.
    async fn reclaim_stale(
        &self,
        cutoff: DateTime<Utc>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Schedule>, StoreError>;

    /// FAILED schedules that `policy` allows back to PENDING at `now`: retries
    /// remain, the backoff has elapsed, and no other schedule for the same
    /// newsletter is active. Oldest failure first.
    async fn find_retry_candidates(
        &self,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Schedule>, StoreError>;

    /// FAILED -> PENDING while `retry_count < max_retries` and no other
    /// schedule for the same newsletter is active.
    async fn requeue(&self, id: i64, max_retries: i32) -> Result<Option<Schedule>, StoreError>;
}

/// Read access to newsletter content plus the `sent` stamp.
#[async_trait::async_trait]
pub trait NewsletterStore: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<Newsletter>, StoreError>;

    async fn mark_sent(&self, id: i64, now: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Read-only view of active subscribers.
#[async_trait::async_trait]
pub trait SubscriberDirectory: Send + Sync {
    /// One keyset page of subscribers active at `snapshot_at`, ordered by id,
    /// starting strictly after `after_id`.
    async fn list_active_page(
        &self,
        snapshot_at: DateTime<Utc>,
        after_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Subscriber>, StoreError>;
}

/// Per-newsletter analytics rows with serialized writers.
#[async_trait::async_trait]
pub trait AnalyticsStore: Send + Sync {
    async fn find(&self, newsletter_id: i64) -> Result<Option<Analytics>, StoreError>;

    /// Create the row if absent, add `deltas` and recompute rates, all under
    /// one writer for the row. Returns the updated row, or `NotFound` when
    /// the newsletter does not exist.
    async fn apply_deltas(
        &self,
        newsletter_id: i64,
        deltas: &[(EventType, i64)],
        basis: RateBasis,
    ) -> Result<Analytics, StoreError>;
}

/// Per-recipient success receipts for a schedule.
#[async_trait::async_trait]
pub trait DeliveryReceiptStore: Send + Sync {
    /// The subset of `subscriber_ids` that already received this schedule.
    async fn delivered_among(
        &self,
        schedule_id: i64,
        subscriber_ids: &[i64],
    ) -> Result<HashSet<i64>, StoreError>;

    async fn record_delivered(
        &self,
        schedule_id: i64,
        subscriber_ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}
