use chrono::{DateTime, Utc};

use super::value_objects::OrderLineInput;

// ============================================================================
// Order Commands - Represent user intent
// ============================================================================

/// Trace identifiers carried from the caller to published events
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceContext {
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
}

impl TraceContext {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            causation_id: None,
        }
    }

    pub fn with_causation(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub customer_id: i64,
    pub payment_condition_id: i64,
    pub order_date: Option<DateTime<Utc>>,
    pub items: Vec<OrderLineInput>,
    pub trace: TraceContext,
}

#[derive(Debug, Clone)]
pub struct ApproveOrder {
    pub order_id: i64,
    pub approved_by: String,
    pub trace: TraceContext,
}

#[derive(Debug, Clone)]
pub struct CancelOrder {
    pub order_id: i64,
}
