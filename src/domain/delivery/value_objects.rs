use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Delivery Value Objects
// ============================================================================

pub const DEFAULT_DELIVERY_DAYS: i32 = 7;

/// How far after the order date delivery is promised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPolicy {
    pub delivery_days: i32,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            delivery_days: DEFAULT_DELIVERY_DAYS,
        }
    }
}

impl DeliveryPolicy {
    pub fn new(delivery_days: i32) -> Self {
        Self { delivery_days }
    }

    pub fn estimate(&self, order_date: DateTime<Utc>) -> DateTime<Utc> {
        order_date + Duration::days(self.delivery_days as i64)
    }
}

/// At most one per order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryCommitment {
    pub id: Option<i64>,
    pub order_id: i64,
    pub estimated_delivery_date: DateTime<Utc>,
    pub delivery_days: i32,
    pub created_at: DateTime<Utc>,
}

impl DeliveryCommitment {
    pub fn for_order(order_id: i64, order_date: DateTime<Utc>, policy: DeliveryPolicy) -> Self {
        Self {
            id: None,
            order_id,
            estimated_delivery_date: policy.estimate(order_date),
            delivery_days: policy.delivery_days,
            created_at: Utc::now(),
        }
    }
}
