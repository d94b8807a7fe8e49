//! Common test utilities for integration tests.
//!
//! Builds the scheduler, delivery engine and aggregator over an
//! [`InMemoryStore`] and a [`MockEmailTransport`], so the whole dispatch
//! path runs without PostgreSQL or a mail server.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Duration, Utc};
use domain::models::{RateBasis, Schedule, ScheduleStatus};
use domain::services::{EmailTransport, InMemoryStore, MockEmailTransport};
use newsletter_api::app::{create_app, AppState};
use newsletter_api::config::{Config, DeliveryConfig, SchedulerConfig};
use newsletter_api::services::{AnalyticsAggregator, DeliveryEngine, DispatchScheduler};

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub transport: Arc<MockEmailTransport>,
    pub analytics: AnalyticsAggregator,
    pub scheduler: DispatchScheduler,
}

pub struct HarnessBuilder {
    transport: MockEmailTransport,
    sender: Option<Arc<dyn EmailTransport>>,
    basis: RateBasis,
    scheduler: SchedulerConfig,
    delivery: DeliveryConfig,
}

impl HarnessBuilder {
    pub fn failing_for(mut self, addresses: &[&str]) -> Self {
        self.transport = MockEmailTransport::failing_for(addresses.iter().copied());
        self
    }

    /// Deliver through `sender` instead of the recording mock.
    pub fn sender(mut self, sender: Arc<dyn EmailTransport>) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn rate_basis(mut self, basis: RateBasis) -> Self {
        self.basis = basis;
        self
    }

    /// Zero backoff so failed schedules are re-queueable immediately.
    pub fn immediate_retries(mut self) -> Self {
        self.scheduler.retry_backoff_secs = vec![0];
        self
    }

    pub fn batch_size(mut self, batch_size: i64) -> Self {
        self.scheduler.batch_size = batch_size;
        self
    }

    pub fn page_size(mut self, page_size: i64) -> Self {
        self.delivery.page_size = page_size;
        self
    }

    pub fn build(self) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let transport = Arc::new(self.transport);
        let sender: Arc<dyn EmailTransport> = match self.sender {
            Some(sender) => sender,
            None => transport.clone(),
        };
        let analytics = AnalyticsAggregator::new(store.clone(), self.basis);
        let engine = DeliveryEngine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            sender,
            analytics.clone(),
            self.delivery,
        );
        let scheduler = DispatchScheduler::new(store.clone(), store.clone(), engine, self.scheduler);

        Harness {
            store,
            transport,
            analytics,
            scheduler,
        }
    }
}

pub fn harness() -> HarnessBuilder {
    HarnessBuilder {
        transport: MockEmailTransport::new(),
        sender: None,
        basis: RateBasis::Delivered,
        scheduler: SchedulerConfig::default(),
        delivery: DeliveryConfig::default(),
    }
}

impl Harness {
    /// A newsletter with one active subscriber per address.
    pub fn newsletter_with_subscribers(&self, addresses: &[&str]) -> i64 {
        for address in addresses {
            self.store.add_subscriber(address);
        }
        self.store
            .add_newsletter("Weekly digest", "<p>Hello</p>", Some("Hello"))
    }

    /// Schedule `newsletter_id` one second in the past and return the schedule id.
    pub async fn schedule_due(&self, newsletter_id: i64) -> i64 {
        self.scheduler
            .schedule_newsletter(newsletter_id, Utc::now() - Duration::seconds(1), None)
            .await
            .expect("schedule newsletter")
            .id
    }

    pub fn schedule(&self, id: i64) -> Schedule {
        self.store.schedule(id).expect("schedule exists")
    }

    pub fn app(&self) -> Router {
        let config = Config::load_for_test(&[("database.url", "postgres://unused")])
            .expect("test config");
        create_app(AppState {
            config: Arc::new(config),
            scheduler: self.scheduler.clone(),
            analytics: self.analytics.clone(),
            pool: None,
        })
    }
}

/// A schedule row for direct insertion into the store.
pub fn schedule_row(
    newsletter_id: i64,
    status: ScheduleStatus,
    scheduled_for: DateTime<Utc>,
) -> Schedule {
    Schedule {
        id: 0,
        newsletter_id,
        scheduled_for,
        cron_expression: None,
        status,
        retry_count: 0,
        error_message: None,
        executed_at: None,
        processing_started_at: None,
        failed_at: None,
        created_at: scheduled_for,
        updated_at: scheduled_for,
    }
}
