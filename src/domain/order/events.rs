use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::aggregate::Order;
use super::value_objects::OrderStatus;

// ============================================================================
// Order Events - Outbound wire payloads
// ============================================================================
//
// These are the published contract, not the aggregate. Mapping from `Order`
// happens here and nowhere else, so the aggregate can change shape without
// breaking consumers.
//
// ============================================================================

/// Order Created - published on `order-created`, keyed by order id
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedEvent {
    pub order_id: i64,
    pub customer_id: i64,
    pub payment_condition_id: i64,
    pub order_date: DateTime<Utc>,
    pub total_amount: Decimal,
    pub status: OrderStatus,
    pub requires_manual_approval: bool,
    #[serde(default)]
    pub items: Vec<OrderCreatedItem>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedItem {
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

/// Order Approved - published on `order-approved` after a manual approval
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderApprovedEvent {
    pub order_id: i64,
    pub status: OrderStatus,
    pub approved_by: Option<String>,
    pub approved_at_utc: DateTime<Utc>,
}

/// Error mapping an aggregate that is not in a publishable state
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EventMappingError {
    #[error("Order has not been persisted yet")]
    NotPersisted,

    #[error("Order {0} has not been approved")]
    NotApproved(i64),
}

impl TryFrom<&Order> for OrderCreatedEvent {
    type Error = EventMappingError;

    fn try_from(order: &Order) -> Result<Self, Self::Error> {
        let order_id = order.id().ok_or(EventMappingError::NotPersisted)?;

        Ok(Self {
            order_id,
            customer_id: order.customer_id(),
            payment_condition_id: order.payment_condition_id(),
            order_date: order.order_date(),
            total_amount: order.total_amount(),
            status: order.status(),
            requires_manual_approval: order.requires_manual_approval(),
            items: order
                .items()
                .iter()
                .map(|line| OrderCreatedItem {
                    product_name: line.product_name().to_string(),
                    quantity: line.quantity(),
                    unit_price: line.unit_price(),
                    total_price: line.total_price(),
                })
                .collect(),
        })
    }
}

impl TryFrom<&Order> for OrderApprovedEvent {
    type Error = EventMappingError;

    fn try_from(order: &Order) -> Result<Self, Self::Error> {
        let order_id = order.id().ok_or(EventMappingError::NotPersisted)?;
        let approved_at_utc = order
            .approved_at()
            .ok_or(EventMappingError::NotApproved(order_id))?;

        Ok(Self {
            order_id,
            status: order.status(),
            approved_by: order.approved_by().map(str::to_string),
            approved_at_utc,
        })
    }
}
