//! Dispatch services and external integrations.

pub mod analytics;
pub mod delivery;
pub mod dispatch;
pub mod email;

pub use analytics::{AnalyticsAggregator, AnalyticsError};
pub use delivery::{DeliveryEngine, DeliveryError, DeliveryReport, DeliveryRequest, DeliveryVerdict};
pub use dispatch::{DispatchScheduler, TickSummary};
pub use email::EmailService;
