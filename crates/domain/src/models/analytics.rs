//! Per-newsletter delivery analytics.
//!
//! Counters only ever grow. The three rates are derived values and are fully
//! recomputed from the counters after every mutation, never adjusted in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Analytics-relevant occurrence attributable to a newsletter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Sent,
    Delivered,
    Opened,
    Clicked,
    Bounced,
    Unsubscribed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Sent => "sent",
            EventType::Delivered => "delivered",
            EventType::Opened => "opened",
            EventType::Clicked => "clicked",
            EventType::Bounced => "bounced",
            EventType::Unsubscribed => "unsubscribed",
        }
    }

    /// Parse an event name. Unknown names yield `None` rather than an error.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sent" => Some(EventType::Sent),
            "delivered" => Some(EventType::Delivered),
            "opened" => Some(EventType::Opened),
            "clicked" => Some(EventType::Clicked),
            "bounced" => Some(EventType::Bounced),
            "unsubscribed" => Some(EventType::Unsubscribed),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Denominator used for `open_rate` and `click_rate`.
///
/// `bounce_rate` is always measured against `total_sent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateBasis {
    #[default]
    Delivered,
    Sent,
}

impl std::str::FromStr for RateBasis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "delivered" => Ok(RateBasis::Delivered),
            "sent" => Ok(RateBasis::Sent),
            other => Err(format!("unknown rate basis: {}", other)),
        }
    }
}

/// Analytics row for one newsletter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Analytics {
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

impl Analytics {
    /// Zeroed analytics for a newsletter with no recorded events.
    pub fn empty(newsletter_id: i64) -> Self {
        Self {
            newsletter_id,
            total_sent: 0,
            total_delivered: 0,
            total_opened: 0,
            total_clicked: 0,
            total_bounced: 0,
            total_unsubscribed: 0,
            open_rate: 0.0,
            click_rate: 0.0,
            bounce_rate: 0.0,
            updated_at: None,
        }
    }

    /// Add `count` to the counter for `event`. Negative counts are ignored.
    pub fn increment(&mut self, event: EventType, count: i64) {
        if count <= 0 {
            return;
        }
        let counter = match event {
            EventType::Sent => &mut self.total_sent,
            EventType::Delivered => &mut self.total_delivered,
            EventType::Opened => &mut self.total_opened,
            EventType::Clicked => &mut self.total_clicked,
            EventType::Bounced => &mut self.total_bounced,
            EventType::Unsubscribed => &mut self.total_unsubscribed,
        };
        *counter = counter.saturating_add(count);
    }

    /// Apply several deltas, then recompute the rates once.
    pub fn apply(&mut self, deltas: &[(EventType, i64)], basis: RateBasis) {
        for (event, count) in deltas {
            self.increment(*event, *count);
        }
        self.recompute_rates(basis);
    }

    /// Recompute all derived rates from the counters.
    pub fn recompute_rates(&mut self, basis: RateBasis) {
        let engagement_base = match basis {
            RateBasis::Delivered => self.total_delivered,
            RateBasis::Sent => self.total_sent,
        };
        self.open_rate = percentage(self.total_opened, engagement_base);
        self.click_rate = percentage(self.total_clicked, engagement_base);
        self.bounce_rate = percentage(self.total_bounced, self.total_sent);
    }
}

/// `part / whole * 100`, or `0` when `whole` is zero.
pub fn percentage(part: i64, whole: i64) -> f64 {
    if whole > 0 {
        (part as f64 * 100.0) / whole as f64
    } else {
        0.0
    }
}

fn default_event_count() -> i64 {
    1
}

/// Request payload for recording tracking events.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct RecordEventRequest {
    #[validate(range(min = 1, message = "newsletter_id must be positive"))]
    pub newsletter_id: i64,

    #[validate(length(min = 1, max = 50, message = "event_type must be 1-50 characters"))]
    pub event_type: String,

    #[serde(default = "default_event_count")]
    #[validate(range(min = 0, max = 1000000, message = "count must be between 0 and 1000000"))]
    pub count: i64,
}

/// Response for a recorded event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RecordEventResponse {
    /// False when the event type was not recognised.
    pub recorded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analytics: Option<Analytics>,
}
