//! Persistence layer for the newsletter dispatch service.
//!
//! This crate contains:
//! - Database connection management
//! - Entity definitions (database row mappings)
//! - PostgreSQL implementations of the domain store traits
//! - Query and pool metrics

pub mod db;
pub mod entities;
pub mod metrics;
pub mod repositories;
