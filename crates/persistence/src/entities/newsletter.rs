//! Newsletter entity definitions.

use chrono::{DateTime, Utc};
use domain::errors::StoreError;
use domain::models::{Newsletter, NewsletterStatus};
use sqlx::FromRow;

/// Database entity for the newsletters table (columns dispatch reads).
#[derive(Debug, Clone, FromRow)]
pub struct NewsletterEntity {
    pub id: i64,
    pub title: String,
    pub subject: String,
    pub content_html: String,
    pub content_text: Option<String>,
    pub status: String,
    pub sent_at: Option<DateTime<Utc>>,
}

impl TryFrom<NewsletterEntity> for Newsletter {
    type Error = StoreError;

    fn try_from(entity: NewsletterEntity) -> Result<Self, Self::Error> {
        let status: NewsletterStatus = entity.status.parse().map_err(StoreError::Database)?;
        Ok(Newsletter {
            id: entity.id,
            title: entity.title,
            subject: entity.subject,
            content_html: entity.content_html,
            content_text: entity.content_text,
            status,
            sent_at: entity.sent_at,
        })
    }
}
