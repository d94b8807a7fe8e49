//! Domain layer for the newsletter dispatch backend.
//!
//! This crate contains:
//! - Domain models (Schedule, Newsletter, Subscriber, Analytics)
//! - Business rules (schedule state machine, rate formulas, retry policy)
//! - Store and transport seams plus in-memory implementations
//! - Domain error types

pub mod errors;
pub mod models;
pub mod services;
