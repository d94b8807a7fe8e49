//! End-to-end dispatch tests: scheduler, delivery engine and analytics over
//! the in-memory store.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use domain::models::{EventType, NewsletterStatus, RateBasis, ScheduleStatus};
use newsletter_api::config::Config;
use newsletter_api::jobs::{Job, NewsletterDispatchJob, ScheduleRetryJob};
use newsletter_api::services::dispatch::STALE_PROCESSING_REASON;
use newsletter_api::services::EmailService;
use tokio_test::assert_ok;

use common::{harness, schedule_row};

#[tokio::test]
async fn test_future_schedule_is_left_pending() {
    let h = harness().build();
    let newsletter_id = h.newsletter_with_subscribers(&["a@example.com"]);
    let schedule_id = h
        .scheduler
        .schedule_newsletter(newsletter_id, Utc::now() + Duration::hours(1), None)
        .await
        .unwrap()
        .id;

    let summary = h.scheduler.tick(Utc::now()).await.unwrap();

    assert_eq!(summary.due, 0);
    let schedule = h.schedule(schedule_id);
    assert_eq!(schedule.status, ScheduleStatus::Pending);
    assert!(schedule.executed_at.is_none());
    assert!(h.transport.sent().is_empty());
}

#[tokio::test]
async fn test_due_schedule_completes_once() {
    let h = harness().build();
    let newsletter_id =
        h.newsletter_with_subscribers(&["a@example.com", "b@example.com", "c@example.com"]);
    let schedule_id = h.schedule_due(newsletter_id).await;

    let summary = h.scheduler.tick(Utc::now()).await.unwrap();
    assert_eq!(summary.claimed, 1);
    assert_eq!(summary.completed, 1);

    let completed = h.schedule(schedule_id);
    assert_eq!(completed.status, ScheduleStatus::Completed);
    assert!(completed.executed_at.is_some());
    assert!(completed.error_message.is_none());
    assert_eq!(
        h.store.newsletter(newsletter_id).unwrap().status,
        NewsletterStatus::Sent
    );

    // Later ticks never touch a completed schedule.
    let summary = h.scheduler.tick(Utc::now() + Duration::hours(2)).await.unwrap();
    assert_eq!(summary.due, 0);
    let after = h.schedule(schedule_id);
    assert_eq!(after.status, ScheduleStatus::Completed);
    assert_eq!(after.executed_at, completed.executed_at);
    assert_eq!(h.transport.sent().len(), 3);

    let analytics = h.analytics.get(newsletter_id).await.unwrap();
    assert_eq!(analytics.total_sent, 3);
    assert_eq!(analytics.total_bounced, 0);
}

#[tokio::test]
async fn test_concurrent_ticks_dispatch_once() {
    let h = harness().build();
    let addresses: Vec<String> = (0..8).map(|i| format!("reader{}@example.com", i)).collect();
    let refs: Vec<&str> = addresses.iter().map(String::as_str).collect();
    let newsletter_id = h.newsletter_with_subscribers(&refs);
    let schedule_id = h.schedule_due(newsletter_id).await;

    let now = Utc::now();
    let first = h.scheduler.clone();
    let second = h.scheduler.clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move { first.tick(now).await }),
        tokio::spawn(async move { second.tick(now).await }),
    );
    let (a, b) = (a.unwrap().unwrap(), b.unwrap().unwrap());

    assert_eq!(a.claimed + b.claimed, 1);
    assert_eq!(h.schedule(schedule_id).status, ScheduleStatus::Completed);
    for address in &addresses {
        assert_eq!(h.transport.sent_to(address), 1, "{} sent more than once", address);
    }
}

#[tokio::test]
async fn test_partial_failure_fails_schedule() {
    let h = harness().failing_for(&["b@example.com"]).build();
    let newsletter_id =
        h.newsletter_with_subscribers(&["a@example.com", "b@example.com", "c@example.com"]);
    let schedule_id = h.schedule_due(newsletter_id).await;

    let summary = h.scheduler.tick(Utc::now()).await.unwrap();
    assert_eq!(summary.failed, 1);

    let failed = h.schedule(schedule_id);
    assert_eq!(failed.status, ScheduleStatus::Failed);
    assert_eq!(failed.retry_count, 1);
    assert!(failed.failed_at.is_some());
    let message = failed.error_message.unwrap();
    assert!(message.contains("1 of 3"), "unexpected message: {}", message);
    assert!(message.contains("b@example.com"));

    assert_eq!(
        h.store.newsletter(newsletter_id).unwrap().status,
        NewsletterStatus::Draft
    );
    let analytics = h.analytics.get(newsletter_id).await.unwrap();
    assert_eq!(analytics.total_sent, 2);
    assert_eq!(analytics.total_bounced, 1);
}

#[tokio::test]
async fn test_disabled_email_never_completes_a_schedule() {
    let config = Config::load_for_test(&[]).unwrap();
    assert!(!config.email.enabled);
    let email = EmailService::new(config.email).unwrap();
    let h = harness().sender(Arc::new(email)).build();
    let newsletter_id =
        h.newsletter_with_subscribers(&["a@example.com", "b@example.com", "c@example.com"]);
    let schedule_id = h.schedule_due(newsletter_id).await;

    let summary = h.scheduler.tick(Utc::now()).await.unwrap();
    assert_eq!(summary.completed, 0);
    assert_eq!(summary.failed, 1);

    let schedule = h.schedule(schedule_id);
    assert_eq!(schedule.status, ScheduleStatus::Failed);
    assert!(schedule.error_message.unwrap().contains("3 of 3"));
    assert_eq!(h.store.receipt_count(schedule_id), 0);
    assert_eq!(
        h.store.newsletter(newsletter_id).unwrap().status,
        NewsletterStatus::Draft
    );
    let analytics = h.analytics.get(newsletter_id).await.unwrap();
    assert_eq!(analytics.total_sent, 0);
    assert_eq!(analytics.total_bounced, 3);
}

#[tokio::test]
async fn test_retries_skip_delivered_recipients_until_exhausted() {
    let h = harness()
        .failing_for(&["bad@example.com"])
        .immediate_retries()
        .build();
    let newsletter_id = h.newsletter_with_subscribers(&["good@example.com", "bad@example.com"]);
    let schedule_id = h.schedule_due(newsletter_id).await;
    let max_retries = h.scheduler.retry_policy().max_retries();

    for attempt in 1..=max_retries {
        h.scheduler.tick(Utc::now()).await.unwrap();
        let schedule = h.schedule(schedule_id);
        assert_eq!(schedule.status, ScheduleStatus::Failed);
        assert_eq!(schedule.retry_count, attempt);

        let requeued = h.scheduler.requeue_failed(Utc::now()).await.unwrap();
        let expected = if attempt < max_retries { 1 } else { 0 };
        assert_eq!(requeued, expected, "attempt {}", attempt);
    }

    // Exhausted: never selected again.
    let summary = h.scheduler.tick(Utc::now() + Duration::days(1)).await.unwrap();
    assert_eq!(summary.due, 0);
    let schedule = h.schedule(schedule_id);
    assert_eq!(schedule.status, ScheduleStatus::Failed);
    assert_eq!(schedule.retry_count, max_retries);

    assert_eq!(h.transport.sent_to("good@example.com"), 1);
    assert_eq!(h.store.receipt_count(schedule_id), 1);
}

#[tokio::test]
async fn test_retry_completes_after_transport_recovers() {
    let h = harness()
        .failing_for(&["flaky@example.com"])
        .immediate_retries()
        .build();
    let newsletter_id = h.newsletter_with_subscribers(&["ok@example.com", "flaky@example.com"]);
    let schedule_id = h.schedule_due(newsletter_id).await;

    h.scheduler.tick(Utc::now()).await.unwrap();
    assert_eq!(h.schedule(schedule_id).status, ScheduleStatus::Failed);

    h.transport.set_failing(Vec::<String>::new());
    assert_eq!(h.scheduler.requeue_failed(Utc::now()).await.unwrap(), 1);
    assert_eq!(h.schedule(schedule_id).status, ScheduleStatus::Pending);

    h.scheduler.tick(Utc::now()).await.unwrap();
    let schedule = h.schedule(schedule_id);
    assert_eq!(schedule.status, ScheduleStatus::Completed);
    assert_eq!(schedule.retry_count, 1);
    assert!(schedule.executed_at.is_some());
    assert_eq!(h.transport.sent_to("ok@example.com"), 1);
    assert_eq!(h.transport.sent_to("flaky@example.com"), 1);
}

#[tokio::test]
async fn test_requeue_waits_for_backoff() {
    let h = harness().failing_for(&["bad@example.com"]).build();
    let newsletter_id = h.newsletter_with_subscribers(&["bad@example.com"]);
    let schedule_id = h.schedule_due(newsletter_id).await;

    h.scheduler.tick(Utc::now()).await.unwrap();
    let failed = h.schedule(schedule_id);
    let failed_at = failed.failed_at.unwrap();
    let backoff = h.scheduler.retry_policy().backoff(failed.retry_count);

    let early = failed_at + backoff - Duration::seconds(1);
    assert_eq!(h.scheduler.requeue_failed(early).await.unwrap(), 0);
    assert_eq!(h.schedule(schedule_id).status, ScheduleStatus::Failed);

    assert_eq!(h.scheduler.requeue_failed(failed_at + backoff).await.unwrap(), 1);
    assert_eq!(h.schedule(schedule_id).status, ScheduleStatus::Pending);
}

#[tokio::test]
async fn test_blocked_retries_do_not_starve_ready_ones() {
    let h = harness().batch_size(1).build();
    let now = Utc::now();
    let blocked_newsletter = h.newsletter_with_subscribers(&["a@example.com"]);
    let ready_newsletter = h.store.add_newsletter("Ready", "<p>r</p>", None);

    let mut blocked = schedule_row(blocked_newsletter, ScheduleStatus::Failed, now - Duration::days(2));
    blocked.retry_count = 1;
    blocked.failed_at = Some(now - Duration::days(1));
    let blocked_id = h.store.insert_schedule(blocked);
    h.scheduler
        .schedule_newsletter(blocked_newsletter, now + Duration::days(30), None)
        .await
        .unwrap();

    let mut ready = schedule_row(ready_newsletter, ScheduleStatus::Failed, now - Duration::hours(2));
    ready.retry_count = 1;
    ready.failed_at = Some(now - Duration::hours(1));
    let ready_id = h.store.insert_schedule(ready);

    assert_eq!(h.scheduler.requeue_failed(now).await.unwrap(), 1);
    assert_eq!(h.schedule(ready_id).status, ScheduleStatus::Pending);
    assert_eq!(h.schedule(blocked_id).status, ScheduleStatus::Failed);
}

#[tokio::test]
async fn test_stale_processing_is_reclaimed() {
    let h = harness().build();
    let newsletter_id = h.newsletter_with_subscribers(&["a@example.com"]);
    let now = Utc::now();
    let mut stuck = schedule_row(newsletter_id, ScheduleStatus::Processing, now - Duration::hours(3));
    stuck.processing_started_at = Some(now - Duration::hours(2));
    let schedule_id = h.store.insert_schedule(stuck);

    let summary = h.scheduler.tick(now).await.unwrap();
    assert_eq!(summary.reclaimed, 1);
    assert_eq!(summary.claimed, 0);

    let schedule = h.schedule(schedule_id);
    assert_eq!(schedule.status, ScheduleStatus::Failed);
    assert_eq!(schedule.retry_count, 1);
    assert_eq!(schedule.error_message.as_deref(), Some(STALE_PROCESSING_REASON));
    assert!(h.transport.sent().is_empty());
}

#[tokio::test]
async fn test_unrecorded_outcome_leaves_schedule_processing() {
    let h = harness().build();
    let newsletter_id = h.newsletter_with_subscribers(&["a@example.com"]);
    let schedule_id = h.schedule_due(newsletter_id).await;

    h.store.set_fail_schedule_writes(true);
    let now = Utc::now();
    let summary = h.scheduler.tick(now).await.unwrap();
    assert_eq!(summary.claimed, 1);
    assert_eq!(summary.completed, 0);
    assert_eq!(h.schedule(schedule_id).status, ScheduleStatus::Processing);

    h.store.set_fail_schedule_writes(false);
    let later = now + Duration::hours(2);
    let summary = h.scheduler.tick(later).await.unwrap();
    assert_eq!(summary.reclaimed, 1);
    assert_eq!(h.schedule(schedule_id).status, ScheduleStatus::Failed);
}

#[tokio::test]
async fn test_cancelled_schedule_is_never_dispatched() {
    let h = harness().build();
    let newsletter_id = h.newsletter_with_subscribers(&["a@example.com"]);
    let schedule_id = h.schedule_due(newsletter_id).await;

    h.scheduler.cancel_schedule(schedule_id).await.unwrap();
    let summary = h.scheduler.tick(Utc::now()).await.unwrap();

    assert_eq!(summary.due, 0);
    assert_eq!(h.schedule(schedule_id).status, ScheduleStatus::Cancelled);
    assert!(h.transport.sent().is_empty());
}

#[tokio::test]
async fn test_no_subscribers_completes() {
    let h = harness().build();
    let newsletter_id = h.newsletter_with_subscribers(&[]);
    let schedule_id = h.schedule_due(newsletter_id).await;

    h.scheduler.tick(Utc::now()).await.unwrap();

    assert_eq!(h.schedule(schedule_id).status, ScheduleStatus::Completed);
    assert!(h.store.analytics(newsletter_id).is_none());
}

#[tokio::test]
async fn test_unsubscribed_readers_are_skipped() {
    let h = harness().page_size(2).build();
    let newsletter_id = h.newsletter_with_subscribers(&[
        "a@example.com",
        "b@example.com",
        "c@example.com",
        "d@example.com",
        "e@example.com",
    ]);
    h.store.set_subscribed(2, false);
    let schedule_id = h.schedule_due(newsletter_id).await;

    h.scheduler.tick(Utc::now()).await.unwrap();

    assert_eq!(h.schedule(schedule_id).status, ScheduleStatus::Completed);
    assert_eq!(h.transport.sent().len(), 4);
    assert_eq!(h.transport.sent_to("b@example.com"), 0);
}

#[tokio::test]
async fn test_missing_newsletter_fails_schedule() {
    let h = harness().build();
    let now = Utc::now();
    let schedule_id = h.store.insert_schedule(schedule_row(
        404,
        ScheduleStatus::Pending,
        now - Duration::minutes(1),
    ));

    h.scheduler.tick(now).await.unwrap();

    let schedule = h.schedule(schedule_id);
    assert_eq!(schedule.status, ScheduleStatus::Failed);
    assert_eq!(schedule.retry_count, 1);
    assert!(schedule.error_message.unwrap().contains("404"));
}

#[tokio::test]
async fn test_schedules_dispatch_in_due_order() {
    let h = harness().build();
    let now = Utc::now();
    let first = h.store.add_newsletter("First", "<p>1</p>", None);
    let second = h.store.add_newsletter("Second", "<p>2</p>", None);
    h.store.add_subscriber("a@example.com");
    h.store.insert_schedule(schedule_row(second, ScheduleStatus::Pending, now - Duration::minutes(1)));
    h.store.insert_schedule(schedule_row(first, ScheduleStatus::Pending, now - Duration::minutes(5)));

    let summary = h.scheduler.tick(now).await.unwrap();
    assert_eq!(summary.completed, 2);

    let subjects: Vec<String> = h.transport.sent().into_iter().map(|m| m.subject).collect();
    assert_eq!(subjects, vec!["First".to_string(), "Second".to_string()]);
}

#[tokio::test]
async fn test_concurrent_events_are_not_lost() {
    let h = harness().rate_basis(RateBasis::Sent).build();
    let newsletter_id = h.store.add_newsletter("Weekly digest", "<p>Hello</p>", None);

    let mut handles = Vec::new();
    for i in 0..140 {
        let analytics = h.analytics.clone();
        let event = if i < 40 { "opened" } else { "sent" };
        handles.push(tokio::spawn(async move {
            analytics.record_event(newsletter_id, event, 1).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().unwrap().is_some());
    }

    let analytics = h.analytics.get(newsletter_id).await.unwrap();
    assert_eq!(analytics.total_opened, 40);
    assert_eq!(analytics.total_sent, 100);
    assert_eq!(analytics.open_rate, 40.0);
}

#[tokio::test]
async fn test_delivery_and_tracking_events_share_counters() {
    let h = harness().failing_for(&["b@example.com"]).build();
    let newsletter_id = h.newsletter_with_subscribers(&["a@example.com", "b@example.com"]);
    h.schedule_due(newsletter_id).await;
    h.scheduler.tick(Utc::now()).await.unwrap();

    h.analytics
        .record(newsletter_id, EventType::Delivered, 1)
        .await
        .unwrap();
    let analytics = h
        .analytics
        .record(newsletter_id, EventType::Opened, 1)
        .await
        .unwrap();

    assert_eq!(analytics.total_sent, 1);
    assert_eq!(analytics.total_bounced, 1);
    assert_eq!(analytics.open_rate, 100.0);
    assert_eq!(analytics.bounce_rate, 100.0);
}

#[tokio::test]
async fn test_jobs_drive_dispatch_and_requeue() {
    let h = harness()
        .failing_for(&["bad@example.com"])
        .immediate_retries()
        .build();
    let newsletter_id = h.newsletter_with_subscribers(&["bad@example.com"]);
    let schedule_id = h.schedule_due(newsletter_id).await;

    let dispatch = NewsletterDispatchJob::new(h.scheduler.clone(), 60);
    let retry = ScheduleRetryJob::new(h.scheduler.clone(), 60);
    assert_eq!(dispatch.name(), "newsletter_dispatch");
    assert_eq!(retry.name(), "schedule_retry");

    assert_ok!(dispatch.execute().await);
    assert_eq!(h.schedule(schedule_id).status, ScheduleStatus::Failed);

    assert_ok!(retry.execute().await);
    assert_eq!(h.schedule(schedule_id).status, ScheduleStatus::Pending);
}
