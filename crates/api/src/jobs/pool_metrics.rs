//! Background job to record connection pool metrics.

use sqlx::PgPool;

use super::scheduler::{Job, JobFrequency};

/// Job that periodically records database connection pool metrics.
pub struct PoolMetricsJob {
    pool: PgPool,
}

impl PoolMetricsJob {
    /// Create a new pool metrics job.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl Job for PoolMetricsJob {
    fn name(&self) -> &'static str {
        "pool_metrics"
    }

    fn frequency(&self) -> JobFrequency {
        // Record pool metrics every 10 seconds for real-time monitoring
        JobFrequency::Seconds(10)
    }

    async fn execute(&self) -> anyhow::Result<()> {
        persistence::metrics::record_pool_metrics(&self.pool);
        Ok(())
    }
}
