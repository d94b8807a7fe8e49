//! Domain models for newsletter scheduling and delivery.

pub mod analytics;
pub mod newsletter;
pub mod schedule;
pub mod subscriber;

pub use analytics::{Analytics, EventType, RateBasis};
pub use newsletter::{Newsletter, NewsletterStatus};
pub use schedule::{Schedule, ScheduleStatus};
pub use subscriber::Subscriber;
