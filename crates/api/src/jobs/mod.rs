//! Background job scheduler and job implementations.

mod newsletter_dispatch;
mod pool_metrics;
mod schedule_retry;
mod scheduler;

pub use newsletter_dispatch::NewsletterDispatchJob;
pub use pool_metrics::PoolMetricsJob;
pub use schedule_retry::ScheduleRetryJob;
pub use scheduler::{Job, JobFrequency, JobScheduler};
