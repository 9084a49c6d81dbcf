use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::domain::customer::{Customer, PaymentCondition};
use crate::domain::delivery::DeliveryCommitment;
use crate::domain::order::{Order, OrderStatus};

use super::{
    CustomerRepository, DeliveryCommitmentRepository, OrderRepository,
    PaymentConditionRepository, StoreError, StoreProbe,
};

const ORDERS_IDEMPOTENCY_KEY: &str = "ux_orders_idempotency_key";
const COMMITMENTS_ORDER_ID: &str = "ux_delivery_commitments_order_id";

#[derive(Default)]
struct Tables {
    customers: HashMap<i64, Customer>,
    payment_conditions: HashMap<i64, PaymentCondition>,
    orders: BTreeMap<i64, Order>,
    orders_by_key: HashMap<String, i64>,
    commitments: HashMap<i64, DeliveryCommitment>,
    next_order_id: i64,
    next_commitment_id: i64,
}

/// Mutex-guarded store. Both unique indexes are checked and written under the
/// same lock, so concurrent inserts behave like the relational store.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with the reference data used by the demo and tests
    pub fn seeded() -> Self {
        let store = Self::new();
        store.add_customer(Customer {
            id: 1,
            name: "Acme Industrial".to_string(),
            email: Some("purchasing@acme.example".to_string()),
        });
        store.add_customer(Customer {
            id: 2,
            name: "Globex Retail".to_string(),
            email: None,
        });
        store.add_payment_condition(PaymentCondition {
            id: 1,
            description: "Cash".to_string(),
            installments: 1,
        });
        store.add_payment_condition(PaymentCondition {
            id: 2,
            description: "3x no interest".to_string(),
            installments: 3,
        });
        store
    }

    pub fn add_customer(&self, customer: Customer) {
        if let Ok(mut tables) = self.tables.lock() {
            tables.customers.insert(customer.id, customer);
        }
    }

    pub fn add_payment_condition(&self, condition: PaymentCondition) {
        if let Ok(mut tables) = self.tables.lock() {
            tables.payment_conditions.insert(condition.id, condition);
        }
    }

    /// Simulate a dropped connection: every call fails with `Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn order_count(&self) -> usize {
        self.tables.lock().map(|t| t.orders.len()).unwrap_or_default()
    }

    pub fn commitment_count(&self) -> usize {
        self.tables.lock().map(|t| t.commitments.len()).unwrap_or_default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store marked unavailable".to_string()));
        }
        self.tables
            .lock()
            .map_err(|_| StoreError::Corrupt("store lock poisoned".to_string()))
    }

    fn replace_order(&self, order: &Order, expected: OrderStatus) -> Result<(), StoreError> {
        let id = order
            .id()
            .ok_or_else(|| StoreError::Query("order has no id".to_string()))?;
        let mut tables = self.tables()?;
        match tables.orders.get_mut(&id) {
            Some(stored) if stored.status() != expected => Err(StoreError::StaleState { id, expected }),
            Some(stored) => {
                *stored = order.clone();
                Ok(())
            }
            None => Err(StoreError::Query(format!("order {} does not exist", id))),
        }
    }
}

#[async_trait]
impl CustomerRepository for InMemoryStore {
    async fn get_customer(&self, id: i64) -> Result<Option<Customer>, StoreError> {
        Ok(self.tables()?.customers.get(&id).cloned())
    }
}

#[async_trait]
impl PaymentConditionRepository for InMemoryStore {
    async fn get_payment_condition(&self, id: i64) -> Result<Option<PaymentCondition>, StoreError> {
        Ok(self.tables()?.payment_conditions.get(&id).cloned())
    }
}

#[async_trait]
impl OrderRepository for InMemoryStore {
    async fn get_by_id(&self, id: i64) -> Result<Option<Order>, StoreError> {
        Ok(self.tables()?.orders.get(&id).cloned())
    }

    async fn get_by_idempotency_key(&self, key: &str) -> Result<Option<Order>, StoreError> {
        let tables = self.tables()?;
        Ok(tables
            .orders_by_key
            .get(key)
            .and_then(|id| tables.orders.get(id))
            .cloned())
    }

    async fn insert(&self, order: &Order) -> Result<i64, StoreError> {
        let key = order
            .idempotency_key()
            .ok_or_else(|| StoreError::Query("order has no idempotency key".to_string()))?;

        let mut tables = self.tables()?;
        if tables.orders_by_key.contains_key(key) {
            return Err(StoreError::UniqueViolation {
                constraint: ORDERS_IDEMPOTENCY_KEY.to_string(),
            });
        }

        tables.next_order_id += 1;
        let id = tables.next_order_id;
        let mut stored = order.clone();
        stored.assign_id(id);
        tables.orders_by_key.insert(key.to_string(), id);
        tables.orders.insert(id, stored);
        Ok(id)
    }

    async fn save_approved_state(&self, order: &Order, expected: OrderStatus) -> Result<(), StoreError> {
        self.replace_order(order, expected)
    }

    async fn save_cancelled_state(&self, order: &Order, expected: OrderStatus) -> Result<(), StoreError> {
        self.replace_order(order, expected)
    }
}

#[async_trait]
impl DeliveryCommitmentRepository for InMemoryStore {
    async fn get_by_order_id(&self, order_id: i64) -> Result<Option<DeliveryCommitment>, StoreError> {
        Ok(self.tables()?.commitments.get(&order_id).cloned())
    }

    async fn insert_commitment(&self, commitment: &DeliveryCommitment) -> Result<i64, StoreError> {
        let mut tables = self.tables()?;
        if tables.commitments.contains_key(&commitment.order_id) {
            return Err(StoreError::UniqueViolation {
                constraint: COMMITMENTS_ORDER_ID.to_string(),
            });
        }

        tables.next_commitment_id += 1;
        let id = tables.next_commitment_id;
        let mut stored = commitment.clone();
        stored.id = Some(id);
        tables.commitments.insert(commitment.order_id, stored);
        Ok(id)
    }
}

#[async_trait]
impl StoreProbe for InMemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.tables().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::delivery::DeliveryPolicy;
    use crate::domain::order::OrderLineInput;
    use chrono::Utc;

    fn keyed_order(key: &str) -> Order {
        let mut order = Order::create(
            1,
            1,
            None,
            vec![OrderLineInput::new("A", 1, "10.00".parse().unwrap())],
        )
        .unwrap();
        order.set_idempotency_key(key).unwrap();
        order
    }

    #[tokio::test]
    async fn test_duplicate_idempotency_key_is_unique_violation() {
        let store = InMemoryStore::new();

        let id = store.insert(&keyed_order("k1")).await.unwrap();
        let err = store.insert(&keyed_order("k1")).await.unwrap_err();

        assert!(err.is_uniqueness_violation());
        assert_eq!(store.order_count(), 1);
        let found = store.get_by_idempotency_key("k1").await.unwrap().unwrap();
        assert_eq!(found.id(), Some(id));
    }

    #[tokio::test]
    async fn test_unkeyed_order_is_refused() {
        let store = InMemoryStore::new();
        let order = Order::create(
            1,
            1,
            None,
            vec![OrderLineInput::new("A", 1, "10.00".parse().unwrap())],
        )
        .unwrap();

        assert!(matches!(store.insert(&order).await, Err(StoreError::Query(_))));
    }

    #[tokio::test]
    async fn test_one_commitment_per_order() {
        let store = InMemoryStore::new();
        let commitment = DeliveryCommitment::for_order(7, Utc::now(), DeliveryPolicy::default());

        store.insert_commitment(&commitment).await.unwrap();
        let err = store.insert_commitment(&commitment).await.unwrap_err();

        assert!(err.is_uniqueness_violation());
        assert_eq!(store.commitment_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_yield_one_winner() {
        let store = std::sync::Arc::new(InMemoryStore::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.insert(&keyed_order("same")).await })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(e) => assert!(e.is_uniqueness_violation()),
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(store.order_count(), 1);
    }

    #[tokio::test]
    async fn test_state_save_against_stale_status_is_refused() {
        let store = InMemoryStore::new();
        let mut order = Order::create(
            1,
            1,
            None,
            vec![OrderLineInput::new("A", 26, "200.00".parse().unwrap())],
        )
        .unwrap();
        order.set_idempotency_key("big").unwrap();
        let id = store.insert(&order).await.unwrap();

        let mut approving = store.get_by_id(id).await.unwrap().unwrap();
        let mut cancelling = store.get_by_id(id).await.unwrap().unwrap();

        approving.approve("supervisor".to_string()).unwrap();
        store
            .save_approved_state(&approving, OrderStatus::Created)
            .await
            .unwrap();

        cancelling.cancel().unwrap();
        let err = store
            .save_cancelled_state(&cancelling, OrderStatus::Created)
            .await
            .unwrap_err();

        assert_eq!(err, StoreError::StaleState { id, expected: OrderStatus::Created });
        assert!(!err.is_transient());
        let stored = store.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Paid);
        assert_eq!(stored.approved_by(), Some("supervisor"));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_transiently() {
        let store = InMemoryStore::seeded();
        store.set_unavailable(true);

        let err = store.get_customer(1).await.unwrap_err();
        assert!(err.is_transient());
        assert!(store.ping().await.is_err());

        store.set_unavailable(false);
        assert!(store.get_customer(1).await.unwrap().is_some());
    }
}
