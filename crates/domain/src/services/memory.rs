//! In-memory implementation of every store trait.
//!
//! Used by tests and local runs without PostgreSQL. All state sits behind a
//! single mutex, so each operation (including analytics updates and CAS
//! transitions) is applied by exactly one writer at a time.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::retry_policy::RetryPolicy;
use super::stores::{
    AnalyticsStore, DeliveryReceiptStore, NewSchedule, NewsletterStore, ScheduleStore,
    SubscriberDirectory,
};
use crate::errors::StoreError;
use crate::models::{
    Analytics, EventType, Newsletter, NewsletterStatus, RateBasis, Schedule, ScheduleStatus,
    Subscriber,
};

#[derive(Debug, Clone)]
struct SubscriberRow {
    email: String,
    is_subscribed: bool,
    subscribed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    newsletters: BTreeMap<i64, Newsletter>,
    subscribers: BTreeMap<i64, SubscriberRow>,
    schedules: BTreeMap<i64, Schedule>,
    analytics: HashMap<i64, Analytics>,
    receipts: HashSet<(i64, i64)>,
    next_newsletter_id: i64,
    next_subscriber_id: i64,
    next_schedule_id: i64,
}

/// Mutex-guarded store for tests and development.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
    fail_schedule_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_schedule_writes.load(Ordering::SeqCst) {
            Err(StoreError::Database("simulated write failure".into()))
        } else {
            Ok(())
        }
    }

    /// Make every schedule outcome write (complete/fail) return a database error.
    pub fn set_fail_schedule_writes(&self, fail: bool) {
        self.fail_schedule_writes.store(fail, Ordering::SeqCst);
    }

    /// Add a draft newsletter and return its id.
    pub fn add_newsletter(&self, subject: &str, html: &str, text: Option<&str>) -> i64 {
        let mut state = self.state();
        state.next_newsletter_id += 1;
        let id = state.next_newsletter_id;
        state.newsletters.insert(
            id,
            Newsletter {
                id,
                title: subject.to_string(),
                subject: subject.to_string(),
                content_html: html.to_string(),
                content_text: text.map(str::to_string),
                status: NewsletterStatus::Draft,
                sent_at: None,
            },
        );
        id
    }

    /// Add an active subscriber and return its id.
    pub fn add_subscriber(&self, email: &str) -> i64 {
        self.add_subscriber_at(email, Utc::now() - chrono::Duration::seconds(1))
    }

    pub fn add_subscriber_at(&self, email: &str, subscribed_at: DateTime<Utc>) -> i64 {
        let mut state = self.state();
        state.next_subscriber_id += 1;
        let id = state.next_subscriber_id;
        state.subscribers.insert(
            id,
            SubscriberRow {
                email: email.to_string(),
                is_subscribed: true,
                subscribed_at,
            },
        );
        id
    }

    pub fn set_subscribed(&self, subscriber_id: i64, is_subscribed: bool) {
        if let Some(row) = self.state().subscribers.get_mut(&subscriber_id) {
            row.is_subscribed = is_subscribed;
        }
    }

    /// Insert a schedule row verbatim, bypassing the active-slot check.
    /// Returns the assigned id.
    pub fn insert_schedule(&self, mut schedule: Schedule) -> i64 {
        let mut state = self.state();
        state.next_schedule_id += 1;
        schedule.id = state.next_schedule_id;
        let id = schedule.id;
        state.schedules.insert(id, schedule);
        id
    }

    pub fn schedule(&self, id: i64) -> Option<Schedule> {
        self.state().schedules.get(&id).cloned()
    }

    pub fn newsletter(&self, id: i64) -> Option<Newsletter> {
        self.state().newsletters.get(&id).cloned()
    }

    pub fn analytics(&self, newsletter_id: i64) -> Option<Analytics> {
        self.state().analytics.get(&newsletter_id).cloned()
    }

    pub fn receipt_count(&self, schedule_id: i64) -> usize {
        self.state()
            .receipts
            .iter()
            .filter(|(s, _)| *s == schedule_id)
            .count()
    }
}

fn has_active(state: &State, newsletter_id: i64, except: Option<i64>) -> bool {
    state.schedules.values().any(|s| {
        s.newsletter_id == newsletter_id && s.status.is_active() && Some(s.id) != except
    })
}

fn by_due_order(a: &Schedule, b: &Schedule) -> std::cmp::Ordering {
    a.scheduled_for
        .cmp(&b.scheduled_for)
        .then(a.id.cmp(&b.id))
}

#[async_trait::async_trait]
impl ScheduleStore for InMemoryStore {
    async fn create(&self, new: NewSchedule) -> Result<Schedule, StoreError> {
        let mut state = self.state();
        if has_active(&state, new.newsletter_id, None) {
            return Err(StoreError::Conflict(format!(
                "newsletter {} already has an active schedule",
                new.newsletter_id
            )));
        }
        state.next_schedule_id += 1;
        let now = Utc::now();
        let schedule = Schedule {
            id: state.next_schedule_id,
            newsletter_id: new.newsletter_id,
            scheduled_for: new.scheduled_for,
            cron_expression: new.cron_expression,
            status: ScheduleStatus::Pending,
            retry_count: 0,
            error_message: None,
            executed_at: None,
            processing_started_at: None,
            failed_at: None,
            created_at: now,
            updated_at: now,
        };
        state.schedules.insert(schedule.id, schedule.clone());
        Ok(schedule)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Schedule>, StoreError> {
        Ok(self.state().schedules.get(&id).cloned())
    }

    async fn list(
        &self,
        status: Option<ScheduleStatus>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Schedule>, StoreError> {
        let state = self.state();
        let mut rows: Vec<Schedule> = state
            .schedules
            .values()
            .filter(|s| status.map_or(true, |wanted| s.status == wanted))
            .cloned()
            .collect();
        rows.sort_by(by_due_order);
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn cancel(&self, id: i64) -> Result<Option<Schedule>, StoreError> {
        let mut state = self.state();
        match state.schedules.get_mut(&id) {
            Some(s) if s.status == ScheduleStatus::Pending => {
                s.status = ScheduleStatus::Cancelled;
                s.updated_at = Utc::now();
                Ok(Some(s.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn reschedule(
        &self,
        id: i64,
        scheduled_for: Option<DateTime<Utc>>,
        cron_expression: Option<String>,
    ) -> Result<Option<Schedule>, StoreError> {
        let mut state = self.state();
        match state.schedules.get_mut(&id) {
            Some(s) if s.status == ScheduleStatus::Pending => {
                if let Some(at) = scheduled_for {
                    s.scheduled_for = at;
                }
                if cron_expression.is_some() {
                    s.cron_expression = cron_expression;
                }
                s.updated_at = Utc::now();
                Ok(Some(s.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn find_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Schedule>, StoreError> {
        let state = self.state();
        let mut due: Vec<Schedule> = state
            .schedules
            .values()
            .filter(|s| s.is_due(now))
            .cloned()
            .collect();
        due.sort_by(by_due_order);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn claim(&self, id: i64, now: DateTime<Utc>) -> Result<Option<Schedule>, StoreError> {
        let mut state = self.state();
        match state.schedules.get_mut(&id) {
            Some(s) if s.is_due(now) => {
                s.status = ScheduleStatus::Processing;
                s.processing_started_at = Some(now);
                s.updated_at = now;
                Ok(Some(s.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_completed(
        &self,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<Schedule>, StoreError> {
        self.check_writable()?;
        let mut state = self.state();
        match state.schedules.get_mut(&id) {
            Some(s) if s.status == ScheduleStatus::Processing => {
                s.status = ScheduleStatus::Completed;
                s.executed_at = s.executed_at.or(Some(now));
                s.error_message = None;
                s.updated_at = now;
                Ok(Some(s.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_failed(
        &self,
        id: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Schedule>, StoreError> {
        self.check_writable()?;
        let mut state = self.state();
        match state.schedules.get_mut(&id) {
            Some(s) if s.status == ScheduleStatus::Processing => {
                s.status = ScheduleStatus::Failed;
                s.error_message = Some(reason.to_string());
                s.retry_count += 1;
                s.failed_at = Some(now);
                s.updated_at = now;
                Ok(Some(s.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn reclaim_stale(
        &self,
        cutoff: DateTime<Utc>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Schedule>, StoreError> {
        let mut state = self.state();
        let mut reclaimed = Vec::new();
        for s in state.schedules.values_mut() {
            let stale = s.status == ScheduleStatus::Processing
                && s.processing_started_at.map_or(true, |at| at < cutoff);
            if stale {
                s.status = ScheduleStatus::Failed;
                s.error_message = Some(reason.to_string());
                s.retry_count += 1;
                s.failed_at = Some(now);
                s.updated_at = now;
                reclaimed.push(s.clone());
            }
        }
        Ok(reclaimed)
    }

    async fn find_retry_candidates(
        &self,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Schedule>, StoreError> {
        let state = self.state();
        let mut rows: Vec<Schedule> = state
            .schedules
            .values()
            .filter(|s| {
                s.status == ScheduleStatus::Failed
                    && policy.is_ready(s.retry_count, s.failed_at, now)
                    && !has_active(&state, s.newsletter_id, Some(s.id))
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.failed_at.cmp(&b.failed_at).then(a.id.cmp(&b.id)));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn requeue(&self, id: i64, max_retries: i32) -> Result<Option<Schedule>, StoreError> {
        let mut state = self.state();
        let newsletter_id = match state.schedules.get(&id) {
            Some(s) if s.status == ScheduleStatus::Failed && s.retry_count < max_retries => {
                s.newsletter_id
            }
            _ => return Ok(None),
        };
        if has_active(&state, newsletter_id, Some(id)) {
            return Ok(None);
        }
        Ok(state.schedules.get_mut(&id).map(|s| {
            s.status = ScheduleStatus::Pending;
            s.processing_started_at = None;
            s.updated_at = Utc::now();
            s.clone()
        }))
    }
}

#[async_trait::async_trait]
impl NewsletterStore for InMemoryStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<Newsletter>, StoreError> {
        Ok(self.state().newsletters.get(&id).cloned())
    }

    async fn mark_sent(&self, id: i64, now: DateTime<Utc>) -> Result<(), StoreError> {
        match self.state().newsletters.get_mut(&id) {
            Some(n) => {
                n.status = NewsletterStatus::Sent;
                n.sent_at = Some(now);
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("newsletter {}", id))),
        }
    }
}

#[async_trait::async_trait]
impl SubscriberDirectory for InMemoryStore {
    async fn list_active_page(
        &self,
        snapshot_at: DateTime<Utc>,
        after_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Subscriber>, StoreError> {
        let state = self.state();
        let lower = after_id.unwrap_or(i64::MIN);
        Ok(state
            .subscribers
            .range((std::ops::Bound::Excluded(lower), std::ops::Bound::Unbounded))
            .filter(|(_, row)| row.is_subscribed && row.subscribed_at <= snapshot_at)
            .take(limit.max(0) as usize)
            .map(|(id, row)| Subscriber {
                id: *id,
                email: row.email.clone(),
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl AnalyticsStore for InMemoryStore {
    async fn find(&self, newsletter_id: i64) -> Result<Option<Analytics>, StoreError> {
        Ok(self.state().analytics.get(&newsletter_id).cloned())
    }

    async fn apply_deltas(
        &self,
        newsletter_id: i64,
        deltas: &[(EventType, i64)],
        basis: RateBasis,
    ) -> Result<Analytics, StoreError> {
        let mut state = self.state();
        if !state.newsletters.contains_key(&newsletter_id) {
            return Err(StoreError::NotFound(format!("newsletter {}", newsletter_id)));
        }
        let row = state
            .analytics
            .entry(newsletter_id)
            .or_insert_with(|| Analytics::empty(newsletter_id));
        row.apply(deltas, basis);
        row.updated_at = Some(Utc::now());
        Ok(row.clone())
    }
}

#[async_trait::async_trait]
impl DeliveryReceiptStore for InMemoryStore {
    async fn delivered_among(
        &self,
        schedule_id: i64,
        subscriber_ids: &[i64],
    ) -> Result<HashSet<i64>, StoreError> {
        let state = self.state();
        Ok(subscriber_ids
            .iter()
            .copied()
            .filter(|id| state.receipts.contains(&(schedule_id, *id)))
            .collect())
    }

    async fn record_delivered(
        &self,
        schedule_id: i64,
        subscriber_ids: &[i64],
        _now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut state = self.state();
        let inserted = subscriber_ids
            .iter()
            .filter(|id| state.receipts.insert((schedule_id, **id)))
            .count();
        Ok(inserted as u64)
    }
}
