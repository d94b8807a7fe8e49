use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use persistence::repositories::{
    AnalyticsRepository, DeliveryReceiptRepository, NewsletterRepository, ScheduleRepository,
    SubscriberRepository,
};
use tracing::{info, warn};

use newsletter_api::app::{create_app, AppState};
use newsletter_api::config::Config;
use newsletter_api::jobs::{JobScheduler, NewsletterDispatchJob, PoolMetricsJob, ScheduleRetryJob};
use newsletter_api::middleware;
use newsletter_api::services::{
    AnalyticsAggregator, DeliveryEngine, DispatchScheduler, EmailService,
};

/// Maximum time to wait for in-flight job runs after shutdown is signalled.
const JOB_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::load().context("failed to load configuration")?;

    middleware::logging::init_logging(&config.logging).context("failed to initialise logging")?;
    middleware::init_metrics().context("failed to install metrics recorder")?;

    info!("Starting newsletter dispatch v{}", env!("CARGO_PKG_VERSION"));

    let db_config: persistence::db::DatabaseConfig = (&config.database).into();
    let pool = persistence::db::create_pool(&db_config).await?;

    info!("Running database migrations...");
    persistence::db::run_migrations(&pool).await?;
    info!("Migrations completed");

    let analytics = AnalyticsAggregator::new(
        Arc::new(AnalyticsRepository::new(pool.clone())),
        config.analytics.rate_basis(),
    );
    let email = EmailService::new(config.email.clone()).context("failed to build email transport")?;
    let email_enabled = email.is_enabled();

    let newsletters = Arc::new(NewsletterRepository::new(pool.clone()));
    let engine = DeliveryEngine::new(
        newsletters.clone(),
        Arc::new(SubscriberRepository::new(pool.clone())),
        Arc::new(DeliveryReceiptRepository::new(pool.clone())),
        Arc::new(email),
        analytics.clone(),
        config.delivery.clone(),
    );
    let scheduler = DispatchScheduler::new(
        Arc::new(ScheduleRepository::new(pool.clone())),
        newsletters,
        engine,
        config.scheduler.clone(),
    );

    let mut jobs = JobScheduler::new();
    if email_enabled {
        jobs.register(NewsletterDispatchJob::new(
            scheduler.clone(),
            config.scheduler.tick_interval_secs,
        ));
        jobs.register(ScheduleRetryJob::new(
            scheduler.clone(),
            config.scheduler.retry_interval_secs,
        ));
    } else {
        warn!("Email delivery is disabled; schedules stay pending until NL__EMAIL__ENABLED=true");
    }
    jobs.register(PoolMetricsJob::new(pool.clone()));
    jobs.start();

    let addr = config.socket_addr()?;
    let app = create_app(AppState {
        config: Arc::new(config),
        scheduler,
        analytics,
        pool: Some(pool),
    });

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    jobs.shutdown();
    jobs.wait_for_shutdown(JOB_SHUTDOWN_TIMEOUT).await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
