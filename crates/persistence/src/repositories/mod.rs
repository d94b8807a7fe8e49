//! Repository implementations for database operations.
//!
//! Each repository implements one of the store traits from the domain crate.

pub mod analytics;
pub mod delivery_receipt;
pub mod newsletter;
pub mod schedule;
pub mod subscriber;

pub use analytics::AnalyticsRepository;
pub use delivery_receipt::DeliveryReceiptRepository;
pub use newsletter::NewsletterRepository;
pub use schedule::ScheduleRepository;
pub use subscriber::SubscriberRepository;
