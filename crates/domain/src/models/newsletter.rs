//! Newsletter domain model.
//!
//! Newsletters are authored elsewhere; dispatch only reads their content and
//! stamps `sent_at` once a schedule completes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Editorial status of a newsletter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NewsletterStatus {
    Draft,
    Scheduled,
    Sent,
    Archived,
}

impl NewsletterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NewsletterStatus::Draft => "draft",
            NewsletterStatus::Scheduled => "scheduled",
            NewsletterStatus::Sent => "sent",
            NewsletterStatus::Archived => "archived",
        }
    }
}

impl std::str::FromStr for NewsletterStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "draft" => Ok(NewsletterStatus::Draft),
            "scheduled" => Ok(NewsletterStatus::Scheduled),
            "sent" => Ok(NewsletterStatus::Sent),
            "archived" => Ok(NewsletterStatus::Archived),
            other => Err(format!("unknown newsletter status: {}", other)),
        }
    }
}

/// The parts of a newsletter a delivery run needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Newsletter {
    pub id: i64,
    pub title: String,
    pub subject: String,
    pub content_html: String,
    pub content_text: Option<String>,
    pub status: NewsletterStatus,
    pub sent_at: Option<DateTime<Utc>>,
}
