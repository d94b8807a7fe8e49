//! Subscriber entity definitions.

use domain::models::Subscriber;
use sqlx::FromRow;

/// Projection of an active subscriber row.
#[derive(Debug, Clone, FromRow)]
pub struct SubscriberEntity {
    pub id: i64,
    pub email: String,
}

impl From<SubscriberEntity> for Subscriber {
    fn from(entity: SubscriberEntity) -> Self {
        Subscriber {
            id: entity.id,
            email: entity.email,
        }
    }
}
