use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::errors::OrderError;

// ============================================================================
// Order Value Objects
// ============================================================================

pub const MAX_PRODUCT_NAME_LEN: usize = 150;

/// Money is stored as NUMERIC(18, 2)
pub const MONEY_SCALE: u32 = 2;

/// Largest amount a NUMERIC(18, 2) column holds: 9999999999999999.99
pub const MAX_MONEY_AMOUNT: Decimal = Decimal::from_parts(2_808_348_671, 232_830_643, 0, false, 2);

/// Order lifecycle status.
///
/// `Pending` is reserved; creation only ever yields `Created` (awaiting manual
/// approval) or `Paid`. `Paid` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Created,
    Paid,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Created => "Created",
            OrderStatus::Paid => "Paid",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Pending" => Some(OrderStatus::Pending),
            "Created" => Some(OrderStatus::Created),
            "Paid" => Some(OrderStatus::Paid),
            "Cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Paid | OrderStatus::Cancelled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied line before validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLineInput {
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl OrderLineInput {
    pub fn new(product_name: impl Into<String>, quantity: i32, unit_price: Decimal) -> Self {
        Self {
            product_name: product_name.into(),
            quantity,
            unit_price,
        }
    }
}

/// A validated order line. `total_price` is always `quantity * unit_price`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    product_name: String,
    quantity: i32,
    unit_price: Decimal,
    total_price: Decimal,
}

impl OrderLine {
    pub fn new(
        product_name: impl Into<String>,
        quantity: i32,
        unit_price: Decimal,
    ) -> Result<Self, OrderError> {
        let product_name = product_name.into().trim().to_string();

        if product_name.is_empty() {
            return Err(OrderError::InvalidArgument {
                field: "product_name",
                reason: "must not be empty".to_string(),
            });
        }
        if product_name.chars().count() > MAX_PRODUCT_NAME_LEN {
            return Err(OrderError::OutOfRange {
                field: "product_name",
                reason: format!("must be at most {} characters", MAX_PRODUCT_NAME_LEN),
            });
        }
        if quantity <= 0 {
            return Err(OrderError::OutOfRange {
                field: "quantity",
                reason: format!("must be greater than zero, got {}", quantity),
            });
        }
        if unit_price <= Decimal::ZERO {
            return Err(OrderError::OutOfRange {
                field: "unit_price",
                reason: format!("must be greater than zero, got {}", unit_price),
            });
        }
        if unit_price.normalize().scale() > MONEY_SCALE {
            return Err(OrderError::OutOfRange {
                field: "unit_price",
                reason: format!("at most {} decimal places, got {}", MONEY_SCALE, unit_price),
            });
        }

        let total_price = Decimal::from(quantity)
            .checked_mul(unit_price)
            .filter(|total| *total <= MAX_MONEY_AMOUNT)
            .ok_or_else(|| OrderError::OutOfRange {
                field: "total_price",
                reason: format!("{} x {} exceeds {}", quantity, unit_price, MAX_MONEY_AMOUNT),
            })?;

        Ok(Self {
            product_name,
            quantity,
            unit_price,
            total_price,
        })
    }

    pub fn product_name(&self) -> &str {
        &self.product_name
    }

    pub fn quantity(&self) -> i32 {
        self.quantity
    }

    pub fn unit_price(&self) -> Decimal {
        self.unit_price
    }

    pub fn total_price(&self) -> Decimal {
        self.total_price
    }
}

impl TryFrom<OrderLineInput> for OrderLine {
    type Error = OrderError;

    fn try_from(input: OrderLineInput) -> Result<Self, Self::Error> {
        OrderLine::new(input.product_name, input.quantity, input.unit_price)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
