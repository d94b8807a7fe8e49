//! Newsletter delivery engine.
//!
//! Fans one newsletter out to the active-subscriber snapshot taken at the
//! start of the run. The directory is read page by page and each page is sent
//! through a bounded pool of in-flight sends, so neither memory nor transport
//! load grows with the size of the list. One recipient's failure never stops
//! the others.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use domain::errors::StoreError;
use domain::models::{EventType, Newsletter, Subscriber};
use domain::services::{
    DeliveryReceiptStore, EmailTransport, NewsletterStore, OutboundEmail, SubscriberDirectory,
    TransportError,
};
use futures::stream::{self, StreamExt};
use metrics::{counter, histogram};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::config::DeliveryConfig;
use crate::services::analytics::AnalyticsAggregator;

/// Failed recipients kept in a report for diagnostics.
pub const MAX_FAILURE_SAMPLES: usize = 10;

/// Errors that abort a delivery run as a whole.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("newsletter {0} not found")]
    NewsletterNotFound(i64),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// One delivery run request.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryRequest {
    /// Owning schedule. When present, recipients with a receipt for it are skipped.
    pub schedule_id: Option<i64>,
    pub newsletter_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedRecipient {
    pub email: String,
    pub reason: String,
}

/// Outcome counts of one delivery run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub success_count: u64,
    pub failure_count: u64,
    /// Recipients that already had a receipt for the schedule.
    pub skipped_count: u64,
    /// First failures, capped at [`MAX_FAILURE_SAMPLES`].
    pub failures: Vec<FailedRecipient>,
}

/// Overall classification of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryVerdict {
    Success,
    Failure { reason: String },
}

impl DeliveryReport {
    /// Sends attempted in this run.
    pub fn attempted(&self) -> u64 {
        self.success_count + self.failure_count
    }

    fn record_success(&mut self) {
        self.success_count += 1;
    }

    fn record_failure(&mut self, email: &str, error: &TransportError) {
        self.failure_count += 1;
        if self.failures.len() < MAX_FAILURE_SAMPLES {
            self.failures.push(FailedRecipient {
                email: email.to_string(),
                reason: error.to_string(),
            });
        }
    }

    /// Success iff nothing was attempted or the success share reaches
    /// `threshold_percent`. A threshold of 100 requires every send to succeed.
    pub fn verdict(&self, threshold_percent: f64) -> DeliveryVerdict {
        let attempted = self.attempted();
        if attempted == 0 || self.failure_count == 0 {
            return DeliveryVerdict::Success;
        }
        let success_percent = (self.success_count as f64 * 100.0) / attempted as f64;
        if success_percent >= threshold_percent {
            DeliveryVerdict::Success
        } else {
            DeliveryVerdict::Failure {
                reason: self.failure_summary(),
            }
        }
    }

    /// Reason recorded on a failed schedule.
    pub fn failure_summary(&self) -> String {
        let first = self
            .failures
            .first()
            .map(|f| format!("{}: {}", f.email, f.reason))
            .unwrap_or_else(|| "unknown".to_string());
        format!(
            "delivery failed for {} of {} recipients (first error: {})",
            self.failure_count,
            self.attempted(),
            first
        )
    }
}

/// Delivers newsletters to the active-subscriber snapshot.
#[derive(Clone)]
pub struct DeliveryEngine {
    newsletters: Arc<dyn NewsletterStore>,
    directory: Arc<dyn SubscriberDirectory>,
    receipts: Arc<dyn DeliveryReceiptStore>,
    transport: Arc<dyn EmailTransport>,
    analytics: AnalyticsAggregator,
    config: DeliveryConfig,
}

impl DeliveryEngine {
    pub fn new(
        newsletters: Arc<dyn NewsletterStore>,
        directory: Arc<dyn SubscriberDirectory>,
        receipts: Arc<dyn DeliveryReceiptStore>,
        transport: Arc<dyn EmailTransport>,
        analytics: AnalyticsAggregator,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            newsletters,
            directory,
            receipts,
            transport,
            analytics,
            config,
        }
    }

    pub fn success_threshold_percent(&self) -> f64 {
        self.config.success_threshold_percent
    }

    /// Run one delivery for `request.newsletter_id`.
    ///
    /// Event counts are reported to analytics once, after the last page,
    /// including when the run is cut short by a store error.
    pub async fn deliver(&self, request: DeliveryRequest) -> Result<DeliveryReport, DeliveryError> {
        let newsletter = self
            .newsletters
            .find_by_id(request.newsletter_id)
            .await?
            .ok_or(DeliveryError::NewsletterNotFound(request.newsletter_id))?;

        let run_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "delivery_run",
            run_id = %run_id,
            newsletter_id = request.newsletter_id,
            schedule_id = ?request.schedule_id,
        );

        async move {
            let started = Instant::now();
            let mut report = DeliveryReport::default();

            let result = self.dispatch_pages(&newsletter, request, &mut report).await;
            self.report_analytics(request.newsletter_id, &report).await;

            histogram!("delivery_run_duration_seconds").record(started.elapsed().as_secs_f64());
            info!(
                success_count = report.success_count,
                failure_count = report.failure_count,
                skipped_count = report.skipped_count,
                duration_ms = started.elapsed().as_millis() as u64,
                "Delivery run finished"
            );

            result.map(|_| report)
        }
        .instrument(span)
        .await
    }

    async fn dispatch_pages(
        &self,
        newsletter: &Newsletter,
        request: DeliveryRequest,
        report: &mut DeliveryReport,
    ) -> Result<(), DeliveryError> {
        let snapshot_at = Utc::now();
        let page_size = self.config.page_size.max(1);
        let mut after_id = None;

        loop {
            let page = self
                .directory
                .list_active_page(snapshot_at, after_id, page_size)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            after_id = Some(last.id);
            let page_len = page.len();

            let recipients = self.pending_recipients(request.schedule_id, page).await?;
            report.skipped_count += (page_len - recipients.len()) as u64;

            let delivered = self.send_page(newsletter, recipients, report).await;

            if let Some(schedule_id) = request.schedule_id {
                if !delivered.is_empty() {
                    self.receipts
                        .record_delivered(schedule_id, &delivered, Utc::now())
                        .await?;
                }
            }

            if (page_len as i64) < page_size {
                break;
            }
        }

        Ok(())
    }

    /// Drop recipients that already hold a receipt for this schedule.
    async fn pending_recipients(
        &self,
        schedule_id: Option<i64>,
        page: Vec<Subscriber>,
    ) -> Result<Vec<Subscriber>, DeliveryError> {
        let Some(schedule_id) = schedule_id else {
            return Ok(page);
        };
        let ids: Vec<i64> = page.iter().map(|s| s.id).collect();
        let delivered = self.receipts.delivered_among(schedule_id, &ids).await?;
        if !delivered.is_empty() {
            counter!("newsletter_sends_total", "outcome" => "skipped")
                .increment(delivered.len() as u64);
        }
        Ok(page
            .into_iter()
            .filter(|s| !delivered.contains(&s.id))
            .collect())
    }

    /// Send one page with at most `worker_concurrency` sends in flight.
    /// Returns the ids that were accepted by the transport.
    async fn send_page(
        &self,
        newsletter: &Newsletter,
        recipients: Vec<Subscriber>,
        report: &mut DeliveryReport,
    ) -> Vec<i64> {
        let transport = self.transport.as_ref();
        let outcomes: Vec<(Subscriber, Result<(), TransportError>)> = stream::iter(recipients)
            .map(|subscriber| {
                let email = OutboundEmail {
                    to: subscriber.email.clone(),
                    subject: newsletter.subject.clone(),
                    html_body: newsletter.content_html.clone(),
                    text_body: newsletter.content_text.clone(),
                };
                async move {
                    let result = transport.send(&email).await;
                    (subscriber, result)
                }
            })
            .buffer_unordered(self.config.worker_concurrency.max(1))
            .collect()
            .await;

        let mut delivered = Vec::with_capacity(outcomes.len());
        for (subscriber, result) in outcomes {
            match result {
                Ok(()) => {
                    counter!("newsletter_sends_total", "outcome" => "success").increment(1);
                    report.record_success();
                    delivered.push(subscriber.id);
                }
                Err(e) => {
                    counter!("newsletter_sends_total", "outcome" => "failure").increment(1);
                    warn!(
                        subscriber_id = subscriber.id,
                        email = %subscriber.email,
                        error = %e,
                        "Send failed"
                    );
                    report.record_failure(&subscriber.email, &e);
                }
            }
        }
        delivered
    }

    async fn report_analytics(&self, newsletter_id: i64, report: &DeliveryReport) {
        if report.attempted() == 0 {
            return;
        }
        let deltas = [
            (EventType::Sent, report.success_count as i64),
            (EventType::Bounced, report.failure_count as i64),
        ];
        match self.analytics.record_batch(newsletter_id, &deltas).await {
            Ok(_) => debug!(newsletter_id = newsletter_id, "Reported delivery counts"),
            Err(e) => warn!(
                newsletter_id = newsletter_id,
                error = %e,
                "Failed to report delivery counts to analytics"
            ),
        }
    }
}
