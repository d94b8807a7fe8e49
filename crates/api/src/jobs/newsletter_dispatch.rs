//! Newsletter dispatch background job.
//!
//! Runs one scheduler tick per interval: reclaim stale schedules, then claim
//! and deliver everything that is due.

use anyhow::Context;
use chrono::Utc;
use tracing::info;

use crate::services::DispatchScheduler;

use super::scheduler::{Job, JobFrequency};

/// Background job driving [`DispatchScheduler::tick`].
pub struct NewsletterDispatchJob {
    scheduler: DispatchScheduler,
    interval_secs: u64,
}

impl NewsletterDispatchJob {
    /// Create a new dispatch job ticking every `interval_secs`.
    pub fn new(scheduler: DispatchScheduler, interval_secs: u64) -> Self {
        Self {
            scheduler,
            interval_secs,
        }
    }
}

#[async_trait::async_trait]
impl Job for NewsletterDispatchJob {
    fn name(&self) -> &'static str {
        "newsletter_dispatch"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.interval_secs)
    }

    async fn execute(&self) -> anyhow::Result<()> {
        let summary = self
            .scheduler
            .tick(Utc::now())
            .await
            .context("scheduler tick failed")?;

        if summary.due > 0 || summary.reclaimed > 0 {
            info!(
                reclaimed = summary.reclaimed,
                due = summary.due,
                claimed = summary.claimed,
                completed = summary.completed,
                failed = summary.failed,
                skipped = summary.skipped,
                "Dispatch tick finished"
            );
        }

        Ok(())
    }
}
