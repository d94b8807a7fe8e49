use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::middleware::{metrics_handler, metrics_middleware, trace_id};
use crate::routes::{analytics, health, schedules};
use crate::services::{AnalyticsAggregator, DispatchScheduler};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub scheduler: DispatchScheduler,
    pub analytics: AnalyticsAggregator,
    /// Present when running against PostgreSQL; used by health checks.
    pub pool: Option<PgPool>,
}

pub fn create_app(state: AppState) -> Router {
    let request_timeout = Duration::from_secs(state.config.server.request_timeout_secs);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route(
            "/api/v1/schedules",
            post(schedules::create_schedule).get(schedules::list_schedules),
        )
        .route(
            "/api/v1/schedules/:id",
            get(schedules::get_schedule).put(schedules::reschedule),
        )
        .route(
            "/api/v1/schedules/:id/cancel",
            post(schedules::cancel_schedule),
        )
        .route("/api/v1/analytics/events", post(analytics::record_event))
        .route(
            "/api/v1/newsletters/:id/analytics",
            get(analytics::get_newsletter_analytics),
        );

    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        // Global middleware (order matters: bottom layers run first)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .layer(cors)
        .with_state(state)
}
