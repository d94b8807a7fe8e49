//! HTTP surface tests driven through the router with `oneshot`.

mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use domain::models::ScheduleStatus;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{harness, schedule_row};

async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app.oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

#[tokio::test]
async fn test_create_and_get_schedule() {
    let h = harness().build();
    let newsletter_id = h.newsletter_with_subscribers(&[]);
    let scheduled_for = Utc::now() + Duration::hours(1);

    let (status, body) = send(
        h.app(),
        Method::POST,
        "/api/v1/schedules",
        Some(json!({
            "newsletter_id": newsletter_id,
            "scheduled_for": scheduled_for.to_rfc3339(),
            "cron_expression": "0 9 * * MON"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["retry_count"], 0);
    assert_eq!(body["cron_expression"], "0 9 * * MON");
    assert_eq!(body["retries_exhausted"], false);

    let id = body["id"].as_i64().unwrap();
    let (status, body) = send(h.app(), Method::GET, &format!("/api/v1/schedules/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["newsletter_id"], newsletter_id);
}

#[tokio::test]
async fn test_create_schedule_validation_and_conflicts() {
    let h = harness().build();
    let newsletter_id = h.newsletter_with_subscribers(&[]);
    let when = Utc::now().to_rfc3339();

    let (status, body) = send(
        h.app(),
        Method::POST,
        "/api/v1/schedules",
        Some(json!({ "newsletter_id": 0, "scheduled_for": when })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, _) = send(
        h.app(),
        Method::POST,
        "/api/v1/schedules",
        Some(json!({ "newsletter_id": 999, "scheduled_for": when })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let request = json!({ "newsletter_id": newsletter_id, "scheduled_for": when });
    let (status, _) = send(h.app(), Method::POST, "/api/v1/schedules", Some(request.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = send(h.app(), Method::POST, "/api/v1/schedules", Some(request)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn test_cancel_schedule() {
    let h = harness().build();
    let newsletter_id = h.newsletter_with_subscribers(&[]);
    let id = h.schedule_due(newsletter_id).await;
    let uri = format!("/api/v1/schedules/{}/cancel", id);

    let (status, body) = send(h.app(), Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (status, _) = send(h.app(), Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(h.app(), Method::POST, "/api/v1/schedules/9999/cancel", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reschedule_pending_schedule() {
    let h = harness().build();
    let newsletter_id = h.newsletter_with_subscribers(&[]);
    let id = h.schedule_due(newsletter_id).await;
    let uri = format!("/api/v1/schedules/{}", id);
    let later = Utc::now() + Duration::days(2);

    let (status, body) = send(
        h.app(),
        Method::PUT,
        &uri,
        Some(json!({ "scheduled_for": later, "cron_expression": "0 9 * * 1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["cron_expression"], "0 9 * * 1");
    assert_eq!(h.schedule(id).scheduled_for, later);

    // Moved into the future, so the next tick leaves it alone.
    let summary = h.scheduler.tick(Utc::now()).await.unwrap();
    assert_eq!(summary.due, 0);

    let (status, _) = send(h.app(), Method::PUT, &uri, Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        h.app(),
        Method::PUT,
        "/api/v1/schedules/9999",
        Some(json!({ "scheduled_for": later })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reschedule_rejects_non_pending_schedules() {
    let h = harness().build();
    let newsletter_id = h.newsletter_with_subscribers(&["a@example.com"]);
    let completed = h.schedule_due(newsletter_id).await;
    h.scheduler.tick(Utc::now()).await.unwrap();
    assert_eq!(h.schedule(completed).status, ScheduleStatus::Completed);

    let now = Utc::now();
    let mut row = schedule_row(newsletter_id, ScheduleStatus::Processing, now);
    row.processing_started_at = Some(now);
    let processing = h.store.insert_schedule(row);

    for id in [completed, processing] {
        let before = h.schedule(id);
        let (status, _) = send(
            h.app(),
            Method::PUT,
            &format!("/api/v1/schedules/{}", id),
            Some(json!({ "scheduled_for": now + Duration::days(1) })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(h.schedule(id), before);
    }
}

#[tokio::test]
async fn test_list_schedules_filters_by_status() {
    let h = harness().build();
    let first = h.newsletter_with_subscribers(&[]);
    let second = h.store.add_newsletter("Second", "<p>2</p>", None);
    let cancelled = h.schedule_due(first).await;
    h.schedule_due(second).await;
    h.scheduler.cancel_schedule(cancelled).await.unwrap();

    let (status, body) = send(h.app(), Method::GET, "/api/v1/schedules", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["schedules"].as_array().unwrap().len(), 2);
    assert_eq!(body["limit"], 50);

    let (_, body) = send(h.app(), Method::GET, "/api/v1/schedules?status=pending", None).await;
    let schedules = body["schedules"].as_array().unwrap();
    assert_eq!(schedules.len(), 1);
    assert_eq!(schedules[0]["newsletter_id"], second);

    let (status, _) = send(h.app(), Method::GET, "/api/v1/schedules?limit=0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_record_event_and_read_analytics() {
    let h = harness().build();
    let newsletter_id = h.newsletter_with_subscribers(&[]);

    let (status, body) = send(
        h.app(),
        Method::POST,
        "/api/v1/analytics/events",
        Some(json!({ "newsletter_id": newsletter_id, "event_type": "delivered", "count": 4 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["recorded"], true);
    assert_eq!(body["analytics"]["total_delivered"], 4);

    let (_, body) = send(
        h.app(),
        Method::POST,
        "/api/v1/analytics/events",
        Some(json!({ "newsletter_id": newsletter_id, "event_type": "opened" })),
    )
    .await;
    assert_eq!(body["analytics"]["open_rate"], 25.0);

    let uri = format!("/api/v1/newsletters/{}/analytics", newsletter_id);
    let (status, body) = send(h.app(), Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_opened"], 1);
}

#[tokio::test]
async fn test_event_for_unknown_newsletter_is_not_found() {
    let h = harness().build();
    let (status, _) = send(
        h.app(),
        Method::POST,
        "/api/v1/analytics/events",
        Some(json!({ "newsletter_id": 404, "event_type": "opened" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(h.store.analytics(404).is_none());
}

#[tokio::test]
async fn test_unknown_event_type_is_ignored() {
    let h = harness().build();

    let (status, body) = send(
        h.app(),
        Method::POST,
        "/api/v1/analytics/events",
        Some(json!({ "newsletter_id": 5, "event_type": "forwarded" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["recorded"], false);
    assert!(body.get("analytics").is_none());
    assert!(h.store.analytics(5).is_none());
}

#[tokio::test]
async fn test_negative_event_count_is_rejected() {
    let h = harness().build();
    let (status, _) = send(
        h.app(),
        Method::POST,
        "/api/v1/analytics/events",
        Some(json!({ "newsletter_id": 5, "event_type": "opened", "count": -1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_analytics_for_untracked_newsletter_is_zeroed() {
    let h = harness().build();
    let (status, body) = send(h.app(), Method::GET, "/api/v1/newsletters/42/analytics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["newsletter_id"], 42);
    assert_eq!(body["total_sent"], 0);
    assert_eq!(body["open_rate"], 0.0);
}

#[tokio::test]
async fn test_health_endpoints_without_database() {
    let h = harness().build();

    let (status, body) = send(h.app(), Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = send(h.app(), Method::GET, "/api/health/live", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "alive");

    let (status, body) = send(h.app(), Method::GET, "/api/health/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let h = harness().build();
    let response = h
        .app()
        .oneshot(
            Request::builder()
                .uri("/api/health/live")
                .header("x-request-id", "req-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers()["x-request-id"], "req-123");
}
