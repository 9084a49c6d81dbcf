// ============================================================================
// Storage Ports
// ============================================================================
//
// Repository traits the order pipeline and the delivery worker depend on.
// Adapters:
// - postgres - sqlx/PgPool, uniqueness enforced by unique indexes
// - memory   - mutex-guarded maps for tests and local runs; enforces the
//              same uniqueness rules atomically under its lock
//
// Adapters classify their native errors into `StoreError`, so callers can
// ask `is_uniqueness_violation()` / `is_transient()` without knowing the
// driver.
//
// State saves are compare-and-set on the order status: the write only lands
// if the stored status is still the one the caller loaded.
//
// ============================================================================

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;

use crate::domain::customer::{Customer, PaymentCondition};
use crate::domain::delivery::DeliveryCommitment;
use crate::domain::order::{Order, OrderStatus};
use crate::utils::IsTransient;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Stored data is invalid: {0}")]
    Corrupt(String),

    #[error("Order {id} is no longer {expected}")]
    StaleState { id: i64, expected: OrderStatus },
}

impl StoreError {
    pub fn is_uniqueness_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }

    pub fn is_stale_state(&self) -> bool {
        matches!(self, StoreError::StaleState { .. })
    }
}

impl IsTransient for StoreError {
    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }
}

#[async_trait]
pub trait CustomerRepository: Send + Sync {
    async fn get_customer(&self, id: i64) -> Result<Option<Customer>, StoreError>;
}

#[async_trait]
pub trait PaymentConditionRepository: Send + Sync {
    async fn get_payment_condition(&self, id: i64) -> Result<Option<PaymentCondition>, StoreError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn get_by_id(&self, id: i64) -> Result<Option<Order>, StoreError>;

    async fn get_by_idempotency_key(&self, key: &str) -> Result<Option<Order>, StoreError>;

    /// Insert order and lines in one transaction; returns the assigned id.
    /// A second order with the same idempotency key fails with
    /// `StoreError::UniqueViolation`.
    async fn insert(&self, order: &Order) -> Result<i64, StoreError>;

    /// Persist status and approval stamp. Fails with `StaleState` when the
    /// stored status is no longer `expected`.
    async fn save_approved_state(&self, order: &Order, expected: OrderStatus) -> Result<(), StoreError>;

    async fn save_cancelled_state(&self, order: &Order, expected: OrderStatus) -> Result<(), StoreError>;
}

#[async_trait]
pub trait DeliveryCommitmentRepository: Send + Sync {
    async fn get_by_order_id(&self, order_id: i64) -> Result<Option<DeliveryCommitment>, StoreError>;

    /// Unique on order id: a second commitment fails with `UniqueViolation`.
    async fn insert_commitment(&self, commitment: &DeliveryCommitment) -> Result<i64, StoreError>;
}

/// Lightweight reachability check used by the consumer connectivity gate
#[async_trait]
pub trait StoreProbe: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;
}
