//! Retry policy for failed schedules.
//!
//! A FAILED schedule is re-queued only after its backoff has elapsed and only
//! while `retry_count < max_retries`. Past the ceiling it stays FAILED until
//! an operator intervenes.

use chrono::{DateTime, Duration, Utc};

/// Default backoff steps in seconds: 1 minute, 5 minutes, 15 minutes.
pub const DEFAULT_RETRY_BACKOFF_SECONDS: [i64; 3] = [60, 300, 900];

/// Default retry ceiling.
pub const DEFAULT_MAX_RETRIES: i32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: i32,
    backoff_secs: Vec<i64>,
}

impl RetryPolicy {
    /// Build a policy. An empty backoff list means immediate re-queue.
    pub fn new(max_retries: i32, backoff_secs: Vec<i64>) -> Self {
        Self {
            max_retries: max_retries.max(0),
            backoff_secs,
        }
    }

    pub fn max_retries(&self) -> i32 {
        self.max_retries
    }

    /// Configured backoff steps in seconds.
    pub fn backoff_secs(&self) -> &[i64] {
        &self.backoff_secs
    }

    pub fn is_exhausted(&self, retry_count: i32) -> bool {
        retry_count >= self.max_retries
    }

    /// Delay before the next attempt after `retry_count` failures.
    ///
    /// The first failure uses the first step; the last step repeats.
    pub fn backoff(&self, retry_count: i32) -> Duration {
        if self.backoff_secs.is_empty() {
            return Duration::zero();
        }
        let index = (retry_count.max(1) as usize - 1).min(self.backoff_secs.len() - 1);
        Duration::seconds(self.backoff_secs[index].max(0))
    }

    pub fn next_attempt_at(&self, retry_count: i32, failed_at: DateTime<Utc>) -> DateTime<Utc> {
        failed_at + self.backoff(retry_count)
    }

    /// Whether a FAILED schedule may go back to PENDING at `now`.
    pub fn is_ready(
        &self,
        retry_count: i32,
        failed_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.is_exhausted(retry_count) {
            return false;
        }
        match failed_at {
            Some(at) => self.next_attempt_at(retry_count, at) <= now,
            None => true,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BACKOFF_SECONDS.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.backoff(1), Duration::seconds(60));
        assert_eq!(policy.backoff(2), Duration::seconds(300));
        assert_eq!(policy.backoff(3), Duration::seconds(900));
    }

    #[test]
    fn test_last_step_repeats() {
        let policy = RetryPolicy::new(10, vec![10, 20]);
        assert_eq!(policy.backoff(5), Duration::seconds(20));
    }

    #[test]
    fn test_exhaustion() {
        let policy = RetryPolicy::new(2, vec![0]);
        assert!(!policy.is_exhausted(0));
        assert!(!policy.is_exhausted(1));
        assert!(policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
    }

    #[test]
    fn test_is_ready_waits_for_backoff() {
        let policy = RetryPolicy::new(3, vec![60]);
        let failed_at = Utc::now();
        assert!(!policy.is_ready(1, Some(failed_at), failed_at + Duration::seconds(59)));
        assert!(policy.is_ready(1, Some(failed_at), failed_at + Duration::seconds(60)));
    }

    #[test]
    fn test_is_ready_never_for_exhausted() {
        let policy = RetryPolicy::new(3, vec![0]);
        let failed_at = Utc::now() - Duration::days(1);
        assert!(!policy.is_ready(3, Some(failed_at), Utc::now()));
    }

    #[test]
    fn test_empty_backoff_is_immediate() {
        let policy = RetryPolicy::new(1, vec![]);
        assert_eq!(policy.backoff(1), Duration::zero());
    }
}
