use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::future::Future;
use std::time::Duration;

use crate::domain::customer::{Customer, PaymentCondition};
use crate::domain::delivery::DeliveryCommitment;
use crate::domain::order::{Order, OrderLine, OrderSnapshot, OrderStatus};
use crate::utils::{retry_on_transient, RetryConfig, RetryResult};

use super::{
    CustomerRepository, DeliveryCommitmentRepository, OrderRepository,
    PaymentConditionRepository, StoreError, StoreProbe,
};

// ============================================================================
// Postgres Store
// ============================================================================
//
// - orders + order_items are written in one transaction
// - ux_orders_idempotency_key / ux_delivery_commitments_order_id are the
//   uniqueness guarantees; violations come back as StoreError::UniqueViolation
// - transient failures (I/O, pool exhaustion, serialization conflicts) are
//   retried with RetryConfig::conservative() before surfacing
//
// ============================================================================

const UNIQUE_VIOLATION: &str = "23505";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
// SQLSTATE class 08: connection exceptions
const CONNECTION_EXCEPTION_CLASS: &str = "08";

/// Map a driver error onto the store-agnostic classification
pub fn classify(error: sqlx::Error) -> StoreError {
    match &error {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            if db.is_unique_violation() || code == UNIQUE_VIOLATION {
                StoreError::UniqueViolation {
                    constraint: db.constraint().unwrap_or("unknown").to_string(),
                }
            } else if code == SERIALIZATION_FAILURE
                || code == DEADLOCK_DETECTED
                || code.starts_with(CONNECTION_EXCEPTION_CLASS)
            {
                StoreError::Unavailable(error.to_string())
            } else {
                StoreError::Query(error.to_string())
            }
        }
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(error.to_string()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(error.to_string())
        }
        _ => StoreError::Query(error.to_string()),
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: i64,
    customer_id: i64,
    payment_condition_id: i64,
    order_date: DateTime<Utc>,
    status: String,
    idempotency_key: String,
    approved_by: Option<String>,
    approved_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    product_name: String,
    quantity: i32,
    unit_price: Decimal,
}

#[derive(sqlx::FromRow)]
struct CommitmentRow {
    id: i64,
    order_id: i64,
    estimated_delivery_date: DateTime<Utc>,
    delivery_days: i32,
    created_at: DateTime<Utc>,
}

impl From<CommitmentRow> for DeliveryCommitment {
    fn from(row: CommitmentRow) -> Self {
        Self {
            id: Some(row.id),
            order_id: row.order_id,
            estimated_delivery_date: row.estimated_delivery_date,
            delivery_days: row.delivery_days,
            created_at: row.created_at,
        }
    }
}

const ORDER_COLUMNS: &str = "id, customer_id, payment_condition_id, order_date, status, \
     idempotency_key, approved_by, approved_at, created_at";

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    retry: RetryConfig,
}

impl PostgresStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(classify)?;

        Ok(Self::new(pool))
    }

    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            retry: RetryConfig::conservative(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, f: F) -> Result<T, StoreError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        match retry_on_transient(self.retry.clone(), f).await {
            RetryResult::Success(value) => Ok(value),
            RetryResult::Failed(e) => {
                tracing::error!(operation = operation, error = %e, "Store retries exhausted");
                Err(e)
            }
            RetryResult::PermanentFailure(e) | RetryResult::Cancelled(e) => Err(e),
        }
    }

    async fn hydrate(&self, row: OrderRow) -> Result<Order, StoreError> {
        let items = sqlx::query_as::<_, OrderItemRow>(
            r#"
            SELECT product_name, quantity, unit_price
            FROM order_items
            WHERE order_id = $1
            ORDER BY line_no
            "#,
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        let lines = items
            .into_iter()
            .map(|item| OrderLine::new(item.product_name, item.quantity, item.unit_price))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Corrupt(format!("order {}: {}", row.id, e)))?;

        let status = OrderStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Corrupt(format!("order {}: unknown status {:?}", row.id, row.status))
        })?;

        Order::from_snapshot(OrderSnapshot {
            id: row.id,
            customer_id: row.customer_id,
            payment_condition_id: row.payment_condition_id,
            order_date: row.order_date,
            items: lines,
            status,
            idempotency_key: row.idempotency_key,
            approved_by: row.approved_by,
            approved_at: row.approved_at,
            created_at: row.created_at,
        })
        .map_err(|e| StoreError::Corrupt(format!("order {}: {}", row.id, e)))
    }

    async fn find_order(&self, column: &'static str, value: OrderLookup<'_>) -> Result<Option<Order>, StoreError> {
        let sql = format!("SELECT {} FROM orders WHERE {} = $1", ORDER_COLUMNS, column);
        let query = sqlx::query_as::<_, OrderRow>(&sql);
        let query = match value {
            OrderLookup::Id(id) => query.bind(id),
            OrderLookup::Key(key) => query.bind(key.to_string()),
        };

        match query.fetch_optional(&self.pool).await.map_err(classify)? {
            Some(row) => self.hydrate(row).await.map(Some),
            None => Ok(None),
        }
    }

    async fn insert_once(&self, order: &Order) -> Result<i64, StoreError> {
        let key = order
            .idempotency_key()
            .ok_or_else(|| StoreError::Query("order has no idempotency key".to_string()))?;

        let mut tx = self.pool.begin().await.map_err(classify)?;

        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO orders (customer_id, payment_condition_id, order_date, total_amount,
                                status, idempotency_key, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(order.customer_id())
        .bind(order.payment_condition_id())
        .bind(order.order_date())
        .bind(order.total_amount())
        .bind(order.status().as_str())
        .bind(key)
        .bind(order.created_at())
        .fetch_one(&mut *tx)
        .await
        .map_err(classify)?;

        for (line_no, line) in order.items().iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, line_no, product_name, quantity,
                                         unit_price, total_price)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(id)
            .bind(line_no as i32)
            .bind(line.product_name())
            .bind(line.quantity())
            .bind(line.unit_price())
            .bind(line.total_price())
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        }

        tx.commit().await.map_err(classify)?;
        Ok(id)
    }

    async fn save_state_once(&self, order: &Order, expected: OrderStatus) -> Result<(), StoreError> {
        let id = order
            .id()
            .ok_or_else(|| StoreError::Query("order has no id".to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, approved_by = $3, approved_at = $4
            WHERE id = $1 AND status = $5
            "#,
        )
        .bind(id)
        .bind(order.status().as_str())
        .bind(order.approved_by())
        .bind(order.approved_at())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let current: Option<(String, Option<String>)> =
            sqlx::query_as("SELECT status, approved_by FROM orders WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(classify)?;

        match current {
            None => Err(StoreError::Query(format!("order {} does not exist", id))),
            // An earlier attempt of this retry loop already committed the write
            Some((status, approved_by))
                if status == order.status().as_str() && approved_by.as_deref() == order.approved_by() =>
            {
                Ok(())
            }
            Some(_) => Err(StoreError::StaleState { id, expected }),
        }
    }
}

#[derive(Clone, Copy)]
enum OrderLookup<'a> {
    Id(i64),
    Key(&'a str),
}

#[async_trait]
impl CustomerRepository for PostgresStore {
    async fn get_customer(&self, id: i64) -> Result<Option<Customer>, StoreError> {
        self.with_retry("get_customer", |_| async move {
            let row: Option<(i64, String, Option<String>)> =
                sqlx::query_as("SELECT id, name, email FROM customers WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(classify)?;

            Ok(row.map(|(id, name, email)| Customer { id, name, email }))
        })
        .await
    }
}

#[async_trait]
impl PaymentConditionRepository for PostgresStore {
    async fn get_payment_condition(&self, id: i64) -> Result<Option<PaymentCondition>, StoreError> {
        self.with_retry("get_payment_condition", |_| async move {
            let row: Option<(i64, String, i32)> = sqlx::query_as(
                "SELECT id, description, installments FROM payment_conditions WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

            Ok(row.map(|(id, description, installments)| PaymentCondition {
                id,
                description,
                installments,
            }))
        })
        .await
    }
}

#[async_trait]
impl OrderRepository for PostgresStore {
    async fn get_by_id(&self, id: i64) -> Result<Option<Order>, StoreError> {
        self.with_retry("get_order_by_id", |_| self.find_order("id", OrderLookup::Id(id)))
            .await
    }

    async fn get_by_idempotency_key(&self, key: &str) -> Result<Option<Order>, StoreError> {
        self.with_retry("get_order_by_idempotency_key", |_| {
            self.find_order("idempotency_key", OrderLookup::Key(key))
        })
        .await
    }

    async fn insert(&self, order: &Order) -> Result<i64, StoreError> {
        self.with_retry("insert_order", |_| self.insert_once(order)).await
    }

    async fn save_approved_state(&self, order: &Order, expected: OrderStatus) -> Result<(), StoreError> {
        self.with_retry("save_approved_state", |_| self.save_state_once(order, expected))
            .await
    }

    async fn save_cancelled_state(&self, order: &Order, expected: OrderStatus) -> Result<(), StoreError> {
        self.with_retry("save_cancelled_state", |_| self.save_state_once(order, expected))
            .await
    }
}

#[async_trait]
impl DeliveryCommitmentRepository for PostgresStore {
    async fn get_by_order_id(&self, order_id: i64) -> Result<Option<DeliveryCommitment>, StoreError> {
        self.with_retry("get_commitment", |_| async move {
            let row = sqlx::query_as::<_, CommitmentRow>(
                r#"
                SELECT id, order_id, estimated_delivery_date, delivery_days, created_at
                FROM delivery_commitments
                WHERE order_id = $1
                "#,
            )
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

            Ok(row.map(DeliveryCommitment::from))
        })
        .await
    }

    async fn insert_commitment(&self, commitment: &DeliveryCommitment) -> Result<i64, StoreError> {
        self.with_retry("insert_commitment", |_| async move {
            let (id,): (i64,) = sqlx::query_as(
                r#"
                INSERT INTO delivery_commitments (order_id, estimated_delivery_date,
                                                  delivery_days, created_at)
                VALUES ($1, $2, $3, $4)
                RETURNING id
                "#,
            )
            .bind(commitment.order_id)
            .bind(commitment.estimated_delivery_date)
            .bind(commitment.delivery_days)
            .bind(commitment.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(classify)?;

            Ok(id)
        })
        .await
    }
}

#[async_trait]
impl StoreProbe for PostgresStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_errors_are_transient() {
        assert!(classify(sqlx::Error::PoolTimedOut).is_transient());
        assert!(classify(sqlx::Error::PoolClosed).is_transient());

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        assert!(classify(sqlx::Error::Io(io)).is_transient());
    }

    #[test]
    fn test_missing_row_is_not_transient() {
        let err = classify(sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::Query(_)));
        assert!(!err.is_transient());
    }
}
