//! Schedule endpoint handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use domain::models::schedule::{
    CreateScheduleRequest, ListSchedulesQuery, ListSchedulesResponse, RescheduleRequest,
    ScheduleResponse,
};
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;

/// Schedule a newsletter for delivery.
///
/// POST /api/v1/schedules
pub async fn create_schedule(
    State(state): State<AppState>,
    Json(request): Json<CreateScheduleRequest>,
) -> Result<(StatusCode, Json<ScheduleResponse>), ApiError> {
    request.validate()?;

    let schedule = state
        .scheduler
        .schedule_newsletter(
            request.newsletter_id,
            request.scheduled_for,
            request.cron_expression,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ScheduleResponse::from_schedule(schedule, max_retries(&state))),
    ))
}

/// List schedules, optionally filtered by status.
///
/// GET /api/v1/schedules
pub async fn list_schedules(
    State(state): State<AppState>,
    Query(query): Query<ListSchedulesQuery>,
) -> Result<Json<ListSchedulesResponse>, ApiError> {
    query.validate()?;

    let max_retries = max_retries(&state);
    let schedules = state
        .scheduler
        .list_schedules(query.status, query.offset, query.limit)
        .await?
        .into_iter()
        .map(|s| ScheduleResponse::from_schedule(s, max_retries))
        .collect();

    Ok(Json(ListSchedulesResponse {
        schedules,
        offset: query.offset,
        limit: query.limit,
    }))
}

/// GET /api/v1/schedules/:id
pub async fn get_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ScheduleResponse>, ApiError> {
    let schedule = state.scheduler.get_schedule(id).await?;
    Ok(Json(ScheduleResponse::from_schedule(
        schedule,
        max_retries(&state),
    )))
}

/// Move a PENDING schedule to a new time or cron expression.
///
/// PUT /api/v1/schedules/:id
pub async fn reschedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<RescheduleRequest>,
) -> Result<Json<ScheduleResponse>, ApiError> {
    request.validate()?;
    request.validate_has_changes().map_err(ApiError::validation)?;

    let schedule = state
        .scheduler
        .reschedule_schedule(id, request.scheduled_for, request.cron_expression)
        .await?;
    Ok(Json(ScheduleResponse::from_schedule(
        schedule,
        max_retries(&state),
    )))
}

/// Cancel a PENDING schedule.
///
/// POST /api/v1/schedules/:id/cancel
pub async fn cancel_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ScheduleResponse>, ApiError> {
    let schedule = state.scheduler.cancel_schedule(id).await?;
    Ok(Json(ScheduleResponse::from_schedule(
        schedule,
        max_retries(&state),
    )))
}

fn max_retries(state: &AppState) -> i32 {
    state.scheduler.retry_policy().max_retries()
}
