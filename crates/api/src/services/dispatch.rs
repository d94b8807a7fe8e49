//! Schedule dispatch service.
//!
//! Drives schedules through PENDING -> PROCESSING -> COMPLETED | FAILED.
//! The PENDING -> PROCESSING claim is a compare-and-set in the store, so
//! overlapping ticks and multiple instances never dispatch the same schedule
//! twice. FAILED schedules return to PENDING only through [`DispatchScheduler::requeue_failed`],
//! which applies the retry policy.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use domain::errors::StoreError;
use domain::models::{Schedule, ScheduleStatus};
use domain::services::{NewSchedule, NewsletterStore, RetryPolicy, ScheduleStore};
use futures::stream::{self, StreamExt};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{SchedulerConfig, MAX_BATCH_SIZE, MAX_STALE_PROCESSING_SECS};
use crate::services::delivery::{DeliveryEngine, DeliveryRequest, DeliveryVerdict};

/// Reason recorded on schedules reclaimed from PROCESSING.
pub const STALE_PROCESSING_REASON: &str = "processing timed out";

/// Counts for one scheduler tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub reclaimed: usize,
    pub due: usize,
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Failed,
    /// Claim lost or the claim itself could not be written.
    Skipped,
    /// Claimed, but the outcome could not be persisted. Left for stale reclaim.
    Abandoned,
}

/// Polls due schedules and records delivery outcomes.
#[derive(Clone)]
pub struct DispatchScheduler {
    schedules: Arc<dyn ScheduleStore>,
    newsletters: Arc<dyn NewsletterStore>,
    engine: DeliveryEngine,
    policy: RetryPolicy,
    config: SchedulerConfig,
}

impl DispatchScheduler {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        newsletters: Arc<dyn NewsletterStore>,
        engine: DeliveryEngine,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            schedules,
            newsletters,
            engine,
            policy: config.retry_policy(),
            config,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// One scheduler pass at `now`.
    ///
    /// Reclaims stale PROCESSING rows, then claims and dispatches due
    /// schedules in `scheduled_for, id` order with at most
    /// `schedule_concurrency` in progress.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickSummary, StoreError> {
        let mut summary = TickSummary {
            reclaimed: self.reclaim_stale(now).await?,
            ..Default::default()
        };

        let due = self
            .schedules
            .find_due(now, self.config.batch_size.clamp(1, MAX_BATCH_SIZE))
            .await?;
        summary.due = due.len();
        if due.is_empty() {
            return Ok(summary);
        }

        let outcomes: Vec<Outcome> = stream::iter(due)
            .map(|schedule| self.process(schedule, now))
            .buffered(self.config.schedule_concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Outcome::Completed => {
                    summary.claimed += 1;
                    summary.completed += 1;
                }
                Outcome::Failed => {
                    summary.claimed += 1;
                    summary.failed += 1;
                }
                Outcome::Abandoned => summary.claimed += 1,
                Outcome::Skipped => summary.skipped += 1,
            }
        }

        Ok(summary)
    }

    async fn reclaim_stale(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let max_age = self
            .config
            .stale_processing_secs
            .clamp(1, MAX_STALE_PROCESSING_SECS);
        let cutoff = now - Duration::seconds(max_age);
        let reclaimed = self
            .schedules
            .reclaim_stale(cutoff, STALE_PROCESSING_REASON, now)
            .await?;

        for schedule in &reclaimed {
            counter!("schedules_reclaimed_total").increment(1);
            counter!("schedule_transitions_total", "status" => ScheduleStatus::Failed.as_str())
                .increment(1);
            warn!(
                schedule_id = schedule.id,
                newsletter_id = schedule.newsletter_id,
                retry_count = schedule.retry_count,
                processing_started_at = ?schedule.processing_started_at,
                "Reclaimed stale processing schedule"
            );
            self.report_if_exhausted(schedule);
        }
        Ok(reclaimed.len())
    }

    async fn process(&self, schedule: Schedule, now: DateTime<Utc>) -> Outcome {
        let claimed = match self.schedules.claim(schedule.id, now).await {
            Ok(Some(claimed)) => claimed,
            Ok(None) => {
                debug!(schedule_id = schedule.id, "Schedule already claimed or cancelled");
                return Outcome::Skipped;
            }
            Err(e) => {
                error!(schedule_id = schedule.id, error = %e, "Failed to claim schedule");
                return Outcome::Skipped;
            }
        };

        counter!("schedule_transitions_total", "status" => ScheduleStatus::Processing.as_str())
            .increment(1);
        info!(
            schedule_id = claimed.id,
            newsletter_id = claimed.newsletter_id,
            retry_count = claimed.retry_count,
            "Dispatching schedule"
        );

        let request = DeliveryRequest {
            schedule_id: Some(claimed.id),
            newsletter_id: claimed.newsletter_id,
        };
        let verdict = match self.engine.deliver(request).await {
            Ok(report) => report.verdict(self.engine.success_threshold_percent()),
            Err(e) => DeliveryVerdict::Failure {
                reason: e.to_string(),
            },
        };

        match verdict {
            DeliveryVerdict::Success => self.complete(&claimed).await,
            DeliveryVerdict::Failure { reason } => self.fail(&claimed, &reason).await,
        }
    }

    async fn complete(&self, schedule: &Schedule) -> Outcome {
        let now = Utc::now();
        match self.schedules.mark_completed(schedule.id, now).await {
            Ok(Some(completed)) => {
                counter!("schedule_transitions_total", "status" => ScheduleStatus::Completed.as_str())
                    .increment(1);
                info!(
                    schedule_id = completed.id,
                    newsletter_id = completed.newsletter_id,
                    "Schedule completed"
                );
                if let Err(e) = self.newsletters.mark_sent(completed.newsletter_id, now).await {
                    warn!(
                        newsletter_id = completed.newsletter_id,
                        error = %e,
                        "Failed to mark newsletter as sent"
                    );
                }
                Outcome::Completed
            }
            Ok(None) => {
                warn!(
                    schedule_id = schedule.id,
                    "Schedule left processing before completion was recorded"
                );
                Outcome::Abandoned
            }
            Err(e) => {
                error!(
                    schedule_id = schedule.id,
                    error = %e,
                    "Failed to record completion; schedule stays processing until reclaimed"
                );
                Outcome::Abandoned
            }
        }
    }

    async fn fail(&self, schedule: &Schedule, reason: &str) -> Outcome {
        match self.schedules.mark_failed(schedule.id, reason, Utc::now()).await {
            Ok(Some(failed)) => {
                counter!("schedule_transitions_total", "status" => ScheduleStatus::Failed.as_str())
                    .increment(1);
                warn!(
                    schedule_id = failed.id,
                    newsletter_id = failed.newsletter_id,
                    retry_count = failed.retry_count,
                    reason = %reason,
                    "Schedule failed"
                );
                self.report_if_exhausted(&failed);
                Outcome::Failed
            }
            Ok(None) => {
                warn!(
                    schedule_id = schedule.id,
                    "Schedule left processing before failure was recorded"
                );
                Outcome::Abandoned
            }
            Err(e) => {
                error!(
                    schedule_id = schedule.id,
                    error = %e,
                    "Failed to record failure; schedule stays processing until reclaimed"
                );
                Outcome::Abandoned
            }
        }
    }

    fn report_if_exhausted(&self, schedule: &Schedule) {
        if self.policy.is_exhausted(schedule.retry_count) {
            error!(
                schedule_id = schedule.id,
                newsletter_id = schedule.newsletter_id,
                retry_count = schedule.retry_count,
                max_retries = self.policy.max_retries(),
                error_message = ?schedule.error_message,
                "Schedule retries exhausted; manual intervention required"
            );
        }
    }

    /// Move FAILED schedules whose backoff has elapsed back to PENDING.
    /// Returns how many were re-queued.
    pub async fn requeue_failed(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let limit = self.config.batch_size.clamp(1, MAX_BATCH_SIZE);
        let candidates = self
            .schedules
            .find_retry_candidates(&self.policy, now, limit)
            .await?;

        let mut requeued = 0;
        for schedule in candidates {
            match self
                .schedules
                .requeue(schedule.id, self.policy.max_retries())
                .await?
            {
                Some(pending) => {
                    requeued += 1;
                    counter!("schedules_requeued_total").increment(1);
                    counter!("schedule_transitions_total", "status" => ScheduleStatus::Pending.as_str())
                        .increment(1);
                    info!(
                        schedule_id = pending.id,
                        newsletter_id = pending.newsletter_id,
                        retry_count = pending.retry_count,
                        "Re-queued failed schedule"
                    );
                }
                None => debug!(
                    schedule_id = schedule.id,
                    "Schedule not re-queued; state changed or newsletter has an active schedule"
                ),
            }
        }
        Ok(requeued)
    }

    /// Create a PENDING schedule for an existing newsletter.
    pub async fn schedule_newsletter(
        &self,
        newsletter_id: i64,
        scheduled_for: DateTime<Utc>,
        cron_expression: Option<String>,
    ) -> Result<Schedule, StoreError> {
        if self.newsletters.find_by_id(newsletter_id).await?.is_none() {
            return Err(StoreError::NotFound(format!("newsletter {}", newsletter_id)));
        }

        let schedule = self
            .schedules
            .create(NewSchedule {
                newsletter_id,
                scheduled_for,
                cron_expression,
            })
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => StoreError::Conflict(format!(
                    "newsletter {} already has an active schedule",
                    newsletter_id
                )),
                other => other,
            })?;

        info!(
            schedule_id = schedule.id,
            newsletter_id = newsletter_id,
            scheduled_for = %schedule.scheduled_for,
            "Newsletter scheduled"
        );
        Ok(schedule)
    }

    /// PENDING -> CANCELLED. Any other state is a conflict.
    pub async fn cancel_schedule(&self, id: i64) -> Result<Schedule, StoreError> {
        if let Some(cancelled) = self.schedules.cancel(id).await? {
            counter!("schedule_transitions_total", "status" => ScheduleStatus::Cancelled.as_str())
                .increment(1);
            info!(schedule_id = id, "Schedule cancelled");
            return Ok(cancelled);
        }

        match self.schedules.find_by_id(id).await? {
            Some(existing) => Err(StoreError::Conflict(format!(
                "schedule {} is {} and cannot be cancelled",
                id, existing.status
            ))),
            None => Err(StoreError::NotFound(format!("schedule {}", id))),
        }
    }

    /// Change when a PENDING schedule runs. Any other state is a conflict.
    pub async fn reschedule_schedule(
        &self,
        id: i64,
        scheduled_for: Option<DateTime<Utc>>,
        cron_expression: Option<String>,
    ) -> Result<Schedule, StoreError> {
        if let Some(updated) = self
            .schedules
            .reschedule(id, scheduled_for, cron_expression)
            .await?
        {
            info!(
                schedule_id = id,
                scheduled_for = %updated.scheduled_for,
                "Schedule rescheduled"
            );
            return Ok(updated);
        }

        match self.schedules.find_by_id(id).await? {
            Some(existing) => Err(StoreError::Conflict(format!(
                "schedule {} is {} and cannot be rescheduled",
                id, existing.status
            ))),
            None => Err(StoreError::NotFound(format!("schedule {}", id))),
        }
    }

    pub async fn get_schedule(&self, id: i64) -> Result<Schedule, StoreError> {
        self.schedules
            .find_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("schedule {}", id)))
    }

    pub async fn list_schedules(
        &self,
        status: Option<ScheduleStatus>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Schedule>, StoreError> {
        self.schedules.list(status, offset, limit).await
    }
}
