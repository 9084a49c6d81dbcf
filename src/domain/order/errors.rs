use super::value_objects::OrderStatus;
use crate::store::StoreError;

// ============================================================================
// Order Business Rule Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrderError {
    #[error("Invalid {field}: {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    #[error("{field} out of range: {reason}")]
    OutOfRange { field: &'static str, reason: String },

    #[error("Cannot {action} order in status {status}")]
    InvalidState { action: &'static str, status: OrderStatus },
}

// ============================================================================
// Order Service Errors - what callers of the command handler see
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrderServiceError {
    #[error(transparent)]
    Order(#[from] OrderError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Duplicate order, existing order id {0}")]
    DuplicateOrder(i64),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage failure: {0}")]
    Storage(StoreError),
}

impl From<StoreError> for OrderServiceError {
    fn from(e: StoreError) -> Self {
        if e.is_transient() {
            OrderServiceError::Unavailable(e.to_string())
        } else {
            OrderServiceError::Storage(e)
        }
    }
}

impl OrderServiceError {
    /// Client-side errors: the request itself is wrong and must not be retried
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            OrderServiceError::Order(_)
                | OrderServiceError::NotFound { .. }
                | OrderServiceError::DuplicateOrder(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_store_error_maps_to_unavailable() {
        let err: OrderServiceError = StoreError::Unavailable("connection refused".into()).into();
        assert!(matches!(err, OrderServiceError::Unavailable(_)));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_other_store_error_maps_to_storage() {
        let err: OrderServiceError = StoreError::Query("syntax error".into()).into();
        assert!(matches!(err, OrderServiceError::Storage(_)));
    }

    #[test]
    fn test_business_errors_are_client_errors() {
        assert!(OrderServiceError::DuplicateOrder(7).is_client_error());
        assert!(OrderServiceError::NotFound { entity: "Customer", id: 1 }.is_client_error());
        assert!(OrderServiceError::from(OrderError::InvalidState {
            action: "approve",
            status: OrderStatus::Paid,
        })
        .is_client_error());
    }

    #[test]
    fn test_error_display() {
        let err = OrderError::InvalidState {
            action: "approve",
            status: OrderStatus::Cancelled,
        };
        assert_eq!(err.to_string(), "Cannot approve order in status Cancelled");
        assert_eq!(
            OrderServiceError::DuplicateOrder(42).to_string(),
            "Duplicate order, existing order id 42"
        );
    }
}
