//! Analytics aggregation service.
//!
//! Owns per-newsletter counters. Every mutation goes through
//! [`AnalyticsStore::apply_deltas`], which serializes writers per newsletter
//! row and recomputes the derived rates from the counters.

use std::sync::Arc;

use domain::errors::StoreError;
use domain::models::{Analytics, EventType, RateBasis};
use domain::services::AnalyticsStore;
use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("Event count must not be negative: {0}")]
    InvalidCount(i64),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Applies event counts to newsletter analytics.
#[derive(Clone)]
pub struct AnalyticsAggregator {
    store: Arc<dyn AnalyticsStore>,
    basis: RateBasis,
}

impl AnalyticsAggregator {
    pub fn new(store: Arc<dyn AnalyticsStore>, basis: RateBasis) -> Self {
        Self { store, basis }
    }

    pub fn rate_basis(&self) -> RateBasis {
        self.basis
    }

    /// Increment the counter for `event` by `count`.
    ///
    /// A zero count records nothing and returns the current snapshot.
    pub async fn record(
        &self,
        newsletter_id: i64,
        event: EventType,
        count: i64,
    ) -> Result<Analytics, AnalyticsError> {
        self.record_batch(newsletter_id, &[(event, count)]).await
    }

    /// Record an event by name. Unknown names are logged and ignored.
    pub async fn record_event(
        &self,
        newsletter_id: i64,
        event_type: &str,
        count: i64,
    ) -> Result<Option<Analytics>, AnalyticsError> {
        let Some(event) = EventType::parse(event_type) else {
            warn!(
                newsletter_id = newsletter_id,
                event_type = %event_type,
                "Ignoring unknown analytics event type"
            );
            counter!("analytics_unknown_events_total").increment(1);
            return Ok(None);
        };

        self.record(newsletter_id, event, count).await.map(Some)
    }

    /// Apply several deltas in one serialized update.
    pub async fn record_batch(
        &self,
        newsletter_id: i64,
        deltas: &[(EventType, i64)],
    ) -> Result<Analytics, AnalyticsError> {
        if let Some((_, count)) = deltas.iter().find(|(_, count)| *count < 0) {
            return Err(AnalyticsError::InvalidCount(*count));
        }

        let effective: Vec<(EventType, i64)> = deltas
            .iter()
            .copied()
            .filter(|(_, count)| *count > 0)
            .collect();
        if effective.is_empty() {
            return self.get(newsletter_id).await;
        }

        let analytics = self
            .store
            .apply_deltas(newsletter_id, &effective, self.basis)
            .await?;

        for (event, count) in &effective {
            counter!("analytics_events_total", "event_type" => event.as_str())
                .increment(*count as u64);
        }
        debug!(
            newsletter_id = newsletter_id,
            deltas = ?effective,
            "Recorded analytics events"
        );

        Ok(analytics)
    }

    /// Current analytics, zeroed when nothing has been recorded yet.
    pub async fn get(&self, newsletter_id: i64) -> Result<Analytics, AnalyticsError> {
        Ok(self
            .store
            .find(newsletter_id)
            .await?
            .unwrap_or_else(|| Analytics::empty(newsletter_id)))
    }
}
