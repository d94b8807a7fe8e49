//! Analytics entity definitions.
//!
//! Maps to the analytics table, one row per newsletter.

use chrono::{DateTime, Utc};
use domain::models::Analytics;
use sqlx::FromRow;

pub const ANALYTICS_COLUMNS: &str = "newsletter_id, total_sent, total_delivered, total_opened, \
     total_clicked, total_bounced, total_unsubscribed, open_rate, click_rate, bounce_rate, \
     updated_at";

/// Database entity for the analytics table.
#[derive(Debug, Clone, FromRow)]
pub struct AnalyticsEntity {
    pub newsletter_id: i64,
    pub total_sent: i64,
    pub total_delivered: i64,
    pub total_opened: i64,
    pub total_clicked: i64,
    pub total_bounced: i64,
    pub total_unsubscribed: i64,
    pub open_rate: f64,
    pub click_rate: f64,
    pub bounce_rate: f64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<AnalyticsEntity> for Analytics {
    fn from(entity: AnalyticsEntity) -> Self {
        Analytics {
            newsletter_id: entity.newsletter_id,
            total_sent: entity.total_sent,
            total_delivered: entity.total_delivered,
            total_opened: entity.total_opened,
            total_clicked: entity.total_clicked,
            total_bounced: entity.total_bounced,
            total_unsubscribed: entity.total_unsubscribed,
            open_rate: entity.open_rate,
            click_rate: entity.click_rate,
            bounce_rate: entity.bounce_rate,
            updated_at: entity.updated_at,
        }
    }
}
