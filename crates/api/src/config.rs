use domain::models::RateBasis;
use domain::services::RetryPolicy;
use serde::Deserialize;
use std::net::SocketAddr;

/// Largest accepted `scheduler.batch_size`.
pub const MAX_BATCH_SIZE: i64 = 10_000;

/// Largest accepted `scheduler.stale_processing_secs` and backoff step (30 days).
pub const MAX_STALE_PROCESSING_SECS: i64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    /// Outbound email configuration
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl From<&DatabaseConfig> for persistence::db::DatabaseConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            url: config.url.clone(),
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            connect_timeout_secs: config.connect_timeout_secs,
            idle_timeout_secs: config.idle_timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Scheduler tick and retry settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between dispatch ticks
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Maximum due schedules selected per tick
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,

    /// Schedules processed in parallel within one tick
    #[serde(default = "default_schedule_concurrency")]
    pub schedule_concurrency: usize,

    /// FAILED schedules at or above this retry count are terminal
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,

    /// Backoff steps in seconds; the last step repeats
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: Vec<i64>,

    /// Seconds between re-queue job runs
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,

    /// PROCESSING age after which a schedule is reclaimed
    #[serde(default = "default_stale_processing")]
    pub stale_processing_secs: i64,
}

impl SchedulerConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_backoff_secs.clone())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            batch_size: default_batch_size(),
            schedule_concurrency: default_schedule_concurrency(),
            max_retries: default_max_retries(),
            retry_backoff_secs: default_retry_backoff(),
            retry_interval_secs: default_retry_interval(),
            stale_processing_secs: default_stale_processing(),
        }
    }
}

/// Delivery engine settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Maximum in-flight sends per delivery run
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Subscribers fetched per directory page
    #[serde(default = "default_page_size")]
    pub page_size: i64,

    /// Minimum share of successful sends for a run to count as delivered
    #[serde(default = "default_success_threshold")]
    pub success_threshold_percent: f64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: default_worker_concurrency(),
            page_size: default_page_size(),
            success_threshold_percent: default_success_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    /// Denominator for open and click rates: delivered or sent
    #[serde(default = "default_rate_basis")]
    pub engagement_rate_basis: String,
}

impl AnalyticsConfig {
    /// Parsed rate basis. Falls back to the default for unknown values,
    /// which `Config::validate` rejects at startup.
    pub fn rate_basis(&self) -> RateBasis {
        self.engagement_rate_basis.parse().unwrap_or_default()
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            engagement_rate_basis: default_rate_basis(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    5
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_tick_interval() -> u64 {
    60
}
fn default_batch_size() -> i64 {
    100
}
fn default_schedule_concurrency() -> usize {
    4
}
fn default_max_retries() -> i32 {
    domain::services::retry_policy::DEFAULT_MAX_RETRIES
}
fn default_retry_backoff() -> Vec<i64> {
    domain::services::retry_policy::DEFAULT_RETRY_BACKOFF_SECONDS.to_vec()
}
fn default_retry_interval() -> u64 {
    60
}
fn default_stale_processing() -> i64 {
    3600
}
fn default_worker_concurrency() -> usize {
    10
}
fn default_page_size() -> i64 {
    500
}
fn default_success_threshold() -> f64 {
    100.0
}
fn default_rate_basis() -> String {
    "delivered".to_string()
}

/// Email service configuration for newsletter delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    /// Whether email sending is enabled
    #[serde(default)]
    pub enabled: bool,

    /// Email provider: smtp, sendgrid, or console (for development)
    #[serde(default = "default_email_provider")]
    pub provider: String,

    /// SMTP server host (for smtp provider)
    #[serde(default)]
    pub smtp_host: String,

    /// SMTP server port (for smtp provider)
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    /// SMTP username (for smtp provider)
    #[serde(default)]
    pub smtp_username: String,

    /// SMTP password (for smtp provider)
    #[serde(default)]
    pub smtp_password: String,

    /// Whether to use TLS for SMTP (default: true)
    #[serde(default = "default_smtp_tls")]
    pub smtp_use_tls: bool,

    /// SendGrid API key (for sendgrid provider)
    #[serde(default)]
    pub sendgrid_api_key: String,

    /// Sender email address (From header)
    #[serde(default = "default_sender_email")]
    pub sender_email: String,

    /// Sender name (From header)
    #[serde(default = "default_sender_name")]
    pub sender_name: String,

    /// Per-message transport timeout
    #[serde(default = "default_email_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_email_provider(),
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            smtp_username: String::new(),
            smtp_password: String::new(),
            smtp_use_tls: default_smtp_tls(),
            sendgrid_api_key: String::new(),
            sender_email: default_sender_email(),
            sender_name: default_sender_name(),
            timeout_secs: default_email_timeout(),
        }
    }
}

fn default_email_provider() -> String {
    "console".to_string()
}

fn default_smtp_port() -> u16 {
    587 // TLS submission port
}

fn default_smtp_tls() -> bool {
    true
}

fn default_sender_email() -> String {
    "newsletter@example.com".to_string()
}

fn default_sender_name() -> String {
    "Newsletter".to_string()
}

fn default_email_timeout() -> u64 {
    30
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

fn invalid(message: &str) -> Result<(), ConfigValidationError> {
    Err(ConfigValidationError::InvalidValue(message.to_string()))
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with NL__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("NL")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("scheduler.retry_backoff_secs")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Load configuration for testing with custom overrides.
    ///
    /// This method creates a config entirely from defaults and overrides,
    /// without relying on config files (which may not be accessible during tests).
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        // Embed defaults directly to avoid file system dependency in tests
        let defaults = r#"
            [server]
            host = "0.0.0.0"
            port = 8080
            request_timeout_secs = 30

            [database]
            url = ""
            max_connections = 20
            min_connections = 5
            connect_timeout_secs = 10
            idle_timeout_secs = 600

            [logging]
            level = "info"
            format = "json"

            [email]
            enabled = false
            provider = "console"
            sender_email = "test@example.com"
            sender_name = "Test"

            [scheduler]
            tick_interval_secs = 60
            batch_size = 100
            schedule_concurrency = 4
            max_retries = 3
            retry_backoff_secs = [60, 300, 900]
            retry_interval_secs = 60
            stale_processing_secs = 3600

            [delivery]
            worker_concurrency = 10
            page_size = 500
            success_threshold_percent = 100.0

            [analytics]
            engagement_rate_basis = "delivered"
        "#;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        // Skip validation in tests to allow partial configs
        Ok(cfg)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        // Database URL is required
        if self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "NL__DATABASE__URL environment variable must be set".to_string(),
            ));
        }

        if self.server.port == 0 {
            return invalid("Server port cannot be 0");
        }

        if self.database.min_connections > self.database.max_connections {
            return invalid("min_connections cannot exceed max_connections");
        }

        let scheduler = &self.scheduler;
        if scheduler.tick_interval_secs == 0 || scheduler.retry_interval_secs == 0 {
            return invalid("scheduler intervals must be at least 1 second");
        }
        if !(1..=MAX_BATCH_SIZE).contains(&scheduler.batch_size) {
            return invalid("scheduler.batch_size must be between 1 and 10000");
        }
        if scheduler.schedule_concurrency == 0 {
            return invalid("scheduler.schedule_concurrency must be at least 1");
        }
        if scheduler.max_retries < 0 {
            return invalid("scheduler.max_retries cannot be negative");
        }
        if scheduler.retry_backoff_secs.is_empty() {
            return invalid("scheduler.retry_backoff_secs must not be empty");
        }
        if scheduler
            .retry_backoff_secs
            .iter()
            .any(|s| !(0..=MAX_STALE_PROCESSING_SECS).contains(s))
        {
            return invalid("scheduler.retry_backoff_secs entries must be between 0 and 2592000");
        }
        if !(1..=MAX_STALE_PROCESSING_SECS).contains(&scheduler.stale_processing_secs) {
            return invalid("scheduler.stale_processing_secs must be between 1 and 2592000");
        }

        let delivery = &self.delivery;
        if delivery.worker_concurrency == 0 {
            return invalid("delivery.worker_concurrency must be at least 1");
        }
        if delivery.page_size < 1 {
            return invalid("delivery.page_size must be at least 1");
        }
        if !(delivery.success_threshold_percent > 0.0
            && delivery.success_threshold_percent <= 100.0)
        {
            return invalid("delivery.success_threshold_percent must be in (0, 100]");
        }

        if self
            .analytics
            .engagement_rate_basis
            .parse::<RateBasis>()
            .is_err()
        {
            return invalid("analytics.engagement_rate_basis must be 'delivered' or 'sent'");
        }

        if !matches!(
            self.email.provider.as_str(),
            "console" | "smtp" | "sendgrid"
        ) {
            return invalid("email.provider must be one of: console, smtp, sendgrid");
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }
}
