//! Domain services for newsletter dispatch.
//!
//! Services contain business logic and the seams (store and transport traits)
//! that the scheduler and delivery engine are wired through.

pub mod memory;
pub mod retry_policy;
pub mod stores;
pub mod transport;

pub use memory::InMemoryStore;
pub use retry_policy::RetryPolicy;
pub use stores::{
    AnalyticsStore, DeliveryReceiptStore, NewSchedule, NewsletterStore, ScheduleStore,
    SubscriberDirectory,
};
pub use transport::{EmailTransport, MockEmailTransport, OutboundEmail, TransportError};
