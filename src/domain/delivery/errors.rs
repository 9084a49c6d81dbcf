use crate::store::StoreError;
use crate::utils::IsTransient;

// ============================================================================
// Delivery Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeliveryError {
    /// The order referenced by the event does not exist. Never retried.
    #[error("Order {0} not found")]
    OrderNotFound(i64),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IsTransient for DeliveryError {
    fn is_transient(&self) -> bool {
        match self {
            DeliveryError::OrderNotFound(_) => false,
            DeliveryError::Store(e) => e.is_transient(),
        }
    }
}
