use serde::{Deserialize, Serialize};

// ============================================================================
// Customer Value Objects
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
}

/// Commercial terms an order is placed under (e.g. "30 days", "3 installments")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentCondition {
    pub id: i64,
    pub description: String,
    pub installments: i32,
}
