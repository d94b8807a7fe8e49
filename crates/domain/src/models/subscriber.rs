//! Subscriber domain model.

use serde::{Deserialize, Serialize};

/// An active subscriber as seen by a delivery run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: i64,
    pub email: String,
}
