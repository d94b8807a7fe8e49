//! Database entity definitions.
//!
//! Entities are direct mappings to database rows.

pub mod analytics;
pub mod newsletter;
pub mod schedule;
pub mod subscriber;

pub use analytics::{AnalyticsEntity, ANALYTICS_COLUMNS};
pub use newsletter::NewsletterEntity;
pub use schedule::{ScheduleEntity, SCHEDULE_COLUMNS};
pub use subscriber::SubscriberEntity;
