use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::errors::OrderError;
use super::value_objects::{OrderLine, OrderLineInput, OrderStatus, MAX_MONEY_AMOUNT};

// ============================================================================
// Order Aggregate - Domain Logic
// ============================================================================
//
// Invariants:
// - total_amount == sum(items[].total_price), recomputed whenever items are set
// - requires_manual_approval() <=> status == Created
// - approved_by / approved_at are only ever set by approve()
// - the idempotency key is set exactly once, before first persistence
//
// ============================================================================

/// Totals strictly above this need a manual approval (golden rule)
pub const MANUAL_APPROVAL_THRESHOLD: Decimal = Decimal::from_parts(500_000, 0, 0, false, 2);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    // Identity (assigned by the store on insert)
    id: Option<i64>,

    customer_id: i64,
    payment_condition_id: i64,
    order_date: DateTime<Utc>,
    items: Vec<OrderLine>,
    total_amount: Decimal,
    status: OrderStatus,
    idempotency_key: Option<String>,

    // Audit Trail
    approved_by: Option<String>,
    approved_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

/// Persisted state used by store adapters to rebuild an `Order`
#[derive(Debug, Clone)]
pub struct OrderSnapshot {
    pub id: i64,
    pub customer_id: i64,
    pub payment_condition_id: i64,
    pub order_date: DateTime<Utc>,
    pub items: Vec<OrderLine>,
    pub status: OrderStatus,
    pub idempotency_key: String,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Factory: validates references and lines, computes the total and applies
    /// the golden rule.
    pub fn create(
        customer_id: i64,
        payment_condition_id: i64,
        order_date: Option<DateTime<Utc>>,
        items: Vec<OrderLineInput>,
    ) -> Result<Self, OrderError> {
        if customer_id <= 0 {
            return Err(OrderError::InvalidArgument {
                field: "customer_id",
                reason: format!("must be positive, got {}", customer_id),
            });
        }
        if payment_condition_id <= 0 {
            return Err(OrderError::InvalidArgument {
                field: "payment_condition_id",
                reason: format!("must be positive, got {}", payment_condition_id),
            });
        }
        if items.is_empty() {
            return Err(OrderError::InvalidArgument {
                field: "items",
                reason: "order must contain at least one item".to_string(),
            });
        }

        let lines = items
            .into_iter()
            .map(OrderLine::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let now = Utc::now();
        let mut order = Self {
            id: None,
            customer_id,
            payment_condition_id,
            order_date: order_date.unwrap_or(now),
            items: Vec::new(),
            total_amount: Decimal::ZERO,
            status: OrderStatus::Pending,
            idempotency_key: None,
            approved_by: None,
            approved_at: None,
            created_at: now,
        };
        order.set_items(lines)?;
        order.status = Self::golden_rule(order.total_amount);

        Ok(order)
    }

    /// Rebuild a persisted order. The total is recomputed from the lines.
    pub fn from_snapshot(snapshot: OrderSnapshot) -> Result<Self, OrderError> {
        let mut order = Self {
            id: Some(snapshot.id),
            customer_id: snapshot.customer_id,
            payment_condition_id: snapshot.payment_condition_id,
            order_date: snapshot.order_date,
            items: Vec::new(),
            total_amount: Decimal::ZERO,
            status: snapshot.status,
            idempotency_key: Some(snapshot.idempotency_key),
            approved_by: snapshot.approved_by,
            approved_at: snapshot.approved_at,
            created_at: snapshot.created_at,
        };
        order.set_items(snapshot.items)?;
        Ok(order)
    }

    /// Created (manual approval) when the total is above the threshold,
    /// Paid otherwise. Exactly the threshold does not need approval.
    pub fn golden_rule(total_amount: Decimal) -> OrderStatus {
        if total_amount > MANUAL_APPROVAL_THRESHOLD {
            OrderStatus::Created
        } else {
            OrderStatus::Paid
        }
    }

    fn set_items(&mut self, items: Vec<OrderLine>) -> Result<(), OrderError> {
        let total = items
            .iter()
            .try_fold(Decimal::ZERO, |acc, line| acc.checked_add(line.total_price()))
            .filter(|total| *total <= MAX_MONEY_AMOUNT)
            .ok_or_else(|| OrderError::OutOfRange {
                field: "total_amount",
                reason: format!("sum of {} lines exceeds {}", items.len(), MAX_MONEY_AMOUNT),
            })?;

        self.total_amount = total;
        self.items = items;
        Ok(())
    }

    pub fn approve(&mut self, approved_by: impl Into<String>) -> Result<(), OrderError> {
        if self.status != OrderStatus::Created {
            return Err(OrderError::InvalidState {
                action: "approve",
                status: self.status,
            });
        }

        let approved_by = approved_by.into();
        if approved_by.trim().is_empty() {
            return Err(OrderError::InvalidArgument {
                field: "approved_by",
                reason: "must not be empty".to_string(),
            });
        }

        self.status = OrderStatus::Paid;
        self.approved_by = Some(approved_by);
        self.approved_at = Some(Utc::now());
        Ok(())
    }

    /// Cancelling an already cancelled order is a no-op.
    pub fn cancel(&mut self) -> Result<(), OrderError> {
        match self.status {
            OrderStatus::Paid => Err(OrderError::InvalidState {
                action: "cancel",
                status: self.status,
            }),
            OrderStatus::Cancelled => Ok(()),
            OrderStatus::Pending | OrderStatus::Created => {
                self.status = OrderStatus::Cancelled;
                Ok(())
            }
        }
    }

    pub fn set_idempotency_key(&mut self, key: impl Into<String>) -> Result<(), OrderError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(OrderError::InvalidArgument {
                field: "idempotency_key",
                reason: "must not be empty".to_string(),
            });
        }
        if self.idempotency_key.is_some() {
            return Err(OrderError::InvalidState {
                action: "re-key",
                status: self.status,
            });
        }

        self.idempotency_key = Some(key);
        Ok(())
    }

    /// Called by the store once the row has been inserted
    pub fn assign_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn customer_id(&self) -> i64 {
        self.customer_id
    }

    pub fn payment_condition_id(&self) -> i64 {
        self.payment_condition_id
    }

    pub fn order_date(&self) -> DateTime<Utc> {
        self.order_date
    }

    pub fn items(&self) -> &[OrderLine] {
        &self.items
    }

    pub fn total_amount(&self) -> Decimal {
        self.total_amount
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn requires_manual_approval(&self) -> bool {
        self.status == OrderStatus::Created
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    pub fn approved_by(&self) -> Option<&str> {
        self.approved_by.as_deref()
    }

    pub fn approved_at(&self) -> Option<DateTime<Utc>> {
        self.approved_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
