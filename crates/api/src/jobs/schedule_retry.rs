//! Failed schedule re-queue job.
//!
//! Moves FAILED schedules back to PENDING once their backoff has elapsed and
//! while they are below the retry ceiling.

use anyhow::Context;
use chrono::Utc;
use tracing::info;

use crate::services::DispatchScheduler;

use super::scheduler::{Job, JobFrequency};

/// Background job driving [`DispatchScheduler::requeue_failed`].
pub struct ScheduleRetryJob {
    scheduler: DispatchScheduler,
    interval_secs: u64,
}

impl ScheduleRetryJob {
    pub fn new(scheduler: DispatchScheduler, interval_secs: u64) -> Self {
        Self {
            scheduler,
            interval_secs,
        }
    }
}

#[async_trait::async_trait]
impl Job for ScheduleRetryJob {
    fn name(&self) -> &'static str {
        "schedule_retry"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.interval_secs)
    }

    async fn execute(&self) -> anyhow::Result<()> {
        let requeued = self
            .scheduler
            .requeue_failed(Utc::now())
            .await
            .context("failed to re-queue schedules")?;

        if requeued > 0 {
            info!(requeued = requeued, "Re-queued failed schedules");
        }

        Ok(())
    }
}
