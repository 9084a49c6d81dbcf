use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sha2::{Digest, Sha256};

use super::aggregate::Order;

// ============================================================================
// Idempotency Key Derivation
// ============================================================================
//
// key = SHA-256( customer | payment condition | total (2 dp) | order day )
//
// Item order and sub-day time differences do not affect the key; identical
// business content on the same calendar day (UTC) always collapses to it.
//
// ============================================================================

pub fn derive_idempotency_key(
    customer_id: i64,
    payment_condition_id: i64,
    total_amount: Decimal,
    order_date: DateTime<Utc>,
) -> String {
    let total = total_amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let material = format!(
        "{}|{}|{:.2}|{}",
        customer_id,
        payment_condition_id,
        total,
        order_date.format("%Y-%m-%d"),
    );

    hex::encode(Sha256::digest(material.as_bytes()))
}

/// Key for an order built by `Order::create`
pub fn idempotency_key_for(order: &Order) -> String {
    derive_idempotency_key(
        order.customer_id(),
        order.payment_condition_id(),
        order.total_amount(),
        order.order_date(),
    )
}
