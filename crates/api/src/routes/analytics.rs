//! Analytics endpoint handlers.

use axum::{
    extract::{Path, State},
    Json,
};
use domain::models::analytics::{Analytics, RecordEventRequest, RecordEventResponse};
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;

/// Record a tracking event against a newsletter.
///
/// POST /api/v1/analytics/events
///
/// Unknown event types are accepted and ignored (`recorded: false`).
pub async fn record_event(
    State(state): State<AppState>,
    Json(request): Json<RecordEventRequest>,
) -> Result<Json<RecordEventResponse>, ApiError> {
    request.validate()?;

    let analytics = state
        .analytics
        .record_event(request.newsletter_id, &request.event_type, request.count)
        .await?;

    Ok(Json(RecordEventResponse {
        recorded: analytics.is_some(),
        analytics,
    }))
}

/// GET /api/v1/newsletters/:id/analytics
pub async fn get_newsletter_analytics(
    State(state): State<AppState>,
    Path(newsletter_id): Path<i64>,
) -> Result<Json<Analytics>, ApiError> {
    Ok(Json(state.analytics.get(newsletter_id).await?))
}
