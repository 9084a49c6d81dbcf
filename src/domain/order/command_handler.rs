use std::sync::Arc;
use std::time::Duration;

use crate::messaging::{publish_bounded, EventPublisher, MessageHeaders, PublishOutcome};
use crate::metrics::Metrics;
use crate::store::{CustomerRepository, OrderRepository, PaymentConditionRepository, StoreError};

use super::aggregate::Order;
use super::commands::{ApproveOrder, CancelOrder, CreateOrder, TraceContext};
use super::errors::{OrderError, OrderServiceError};
use super::events::{OrderApprovedEvent, OrderCreatedEvent};
use super::idempotency::idempotency_key_for;
use super::value_objects::OrderStatus;

// ============================================================================
// Order Command Handler
// ============================================================================
//
// Orchestrates: Command → Aggregate → Store → Event (best effort)
//
// Creation is idempotent:
//   1. pre-check by idempotency key (fast path, races)
//   2. insert under the unique index (the actual guarantee)
//   3. uniqueness violation -> re-read the winner -> DuplicateOrder(winner)
//
// Approve and cancel are guarded by the status they loaded; losing a
// concurrent transition surfaces as InvalidState against the winner's status.
//
// Publication runs after the write has committed. Its outcome is logged and
// never turned into an error for the caller.
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct OrderTopics {
    pub order_created: String,
    pub order_approved: String,
}

impl Default for OrderTopics {
    fn default() -> Self {
        Self {
            order_created: "order-created".to_string(),
            order_approved: "order-approved".to_string(),
        }
    }
}

pub struct OrderCommandHandler {
    customers: Arc<dyn CustomerRepository>,
    payment_conditions: Arc<dyn PaymentConditionRepository>,
    orders: Arc<dyn OrderRepository>,
    publisher: Arc<dyn EventPublisher>,
    topics: OrderTopics,
    publish_timeout: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl OrderCommandHandler {
    pub fn new(
        customers: Arc<dyn CustomerRepository>,
        payment_conditions: Arc<dyn PaymentConditionRepository>,
        orders: Arc<dyn OrderRepository>,
        publisher: Arc<dyn EventPublisher>,
        topics: OrderTopics,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            customers,
            payment_conditions,
            orders,
            publisher,
            topics,
            publish_timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Create an order, or fail with `DuplicateOrder` pointing at the
    /// existing one when the same business content was already submitted.
    pub async fn create_order(&self, command: CreateOrder) -> Result<Order, OrderServiceError> {
        if self.customers.get_customer(command.customer_id).await?.is_none() {
            return Err(OrderServiceError::NotFound {
                entity: "Customer",
                id: command.customer_id,
            });
        }
        if self
            .payment_conditions
            .get_payment_condition(command.payment_condition_id)
            .await?
            .is_none()
        {
            return Err(OrderServiceError::NotFound {
                entity: "PaymentCondition",
                id: command.payment_condition_id,
            });
        }

        let mut order = Order::create(
            command.customer_id,
            command.payment_condition_id,
            command.order_date,
            command.items,
        )?;
        let key = idempotency_key_for(&order);
        order.set_idempotency_key(key.clone())?;

        if let Some(existing) = self.orders.get_by_idempotency_key(&key).await? {
            let existing_id = stored_id(&existing)?;
            tracing::info!(
                existing_order_id = existing_id,
                customer_id = command.customer_id,
                "Duplicate order submission rejected by pre-check"
            );
            self.record_duplicate("pre_check");
            return Err(OrderServiceError::DuplicateOrder(existing_id));
        }

        let order_id = match self.orders.insert(&order).await {
            Ok(id) => id,
            Err(e) if e.is_uniqueness_violation() => {
                // A concurrent identical submission won the insert
                match self.orders.get_by_idempotency_key(&key).await? {
                    Some(winner) => {
                        let winner_id = stored_id(&winner)?;
                        tracing::info!(
                            existing_order_id = winner_id,
                            customer_id = command.customer_id,
                            "Duplicate order detected by unique index"
                        );
                        self.record_duplicate("unique_violation");
                        return Err(OrderServiceError::DuplicateOrder(winner_id));
                    }
                    None => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        };
        order.assign_id(order_id);

        tracing::info!(
            order_id = order_id,
            customer_id = order.customer_id(),
            total_amount = %order.total_amount(),
            status = %order.status(),
            requires_manual_approval = order.requires_manual_approval(),
            "✅ Order created"
        );

        match OrderCreatedEvent::try_from(&order) {
            Ok(event) => {
                self.publish(&self.topics.order_created, order_id, &event, &command.trace)
                    .await;
            }
            Err(e) => {
                tracing::error!(order_id = order_id, error = %e, "Could not map order-created event");
            }
        }

        Ok(order)
    }

    /// Manual approval of an order above the threshold
    pub async fn approve_order(&self, command: ApproveOrder) -> Result<Order, OrderServiceError> {
        let mut order = self.load(command.order_id).await?;
        let before = order.status();

        order.approve(command.approved_by)?;
        if let Err(e) = self.orders.save_approved_state(&order, before).await {
            return Err(self.lost_transition(command.order_id, "approve", e).await);
        }

        tracing::info!(
            order_id = command.order_id,
            approved_by = order.approved_by().unwrap_or_default(),
            "✅ Order approved"
        );

        match OrderApprovedEvent::try_from(&order) {
            Ok(event) => {
                self.publish(&self.topics.order_approved, command.order_id, &event, &command.trace)
                    .await;
            }
            Err(e) => {
                tracing::error!(
                    order_id = command.order_id,
                    error = %e,
                    "Could not map order-approved event"
                );
            }
        }

        Ok(order)
    }

    /// Cancel a non-paid order. Cancelling twice is a no-op.
    pub async fn cancel_order(&self, command: CancelOrder) -> Result<Order, OrderServiceError> {
        let mut order = self.load(command.order_id).await?;
        let before = order.status();

        order.cancel()?;
        if before != order.status() {
            if let Err(e) = self.orders.save_cancelled_state(&order, before).await {
                let err = self.lost_transition(command.order_id, "cancel", e).await;
                // A concurrent cancel got there first
                if let OrderServiceError::Order(OrderError::InvalidState {
                    status: OrderStatus::Cancelled,
                    ..
                }) = err
                {
                    return self.load(command.order_id).await;
                }
                return Err(err);
            }
            tracing::info!(order_id = command.order_id, from = %before, "Order cancelled");
        }

        Ok(order)
    }

    pub async fn get_order(&self, order_id: i64) -> Result<Order, OrderServiceError> {
        self.load(order_id).await
    }

    async fn load(&self, order_id: i64) -> Result<Order, OrderServiceError> {
        self.orders
            .get_by_id(order_id)
            .await?
            .ok_or(OrderServiceError::NotFound {
                entity: "Order",
                id: order_id,
            })
    }

    /// Map a failed state save. A stale status means another transition
    /// committed first; report it against the status it left behind.
    async fn lost_transition(
        &self,
        order_id: i64,
        action: &'static str,
        error: StoreError,
    ) -> OrderServiceError {
        if !error.is_stale_state() {
            return error.into();
        }

        match self.load(order_id).await {
            Ok(current) => {
                tracing::info!(
                    order_id = order_id,
                    action = action,
                    status = %current.status(),
                    "Concurrent transition won, refusing"
                );
                OrderError::InvalidState {
                    action,
                    status: current.status(),
                }
                .into()
            }
            Err(e) => e,
        }
    }

    async fn publish<E: serde::Serialize>(
        &self,
        topic: &str,
        order_id: i64,
        event: &E,
        trace: &TraceContext,
    ) -> PublishOutcome {
        let payload = match serde_json::to_vec(event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(order_id = order_id, topic = %topic, error = %e, "Event serialization failed");
                return PublishOutcome::Failed(e.to_string());
            }
        };

        publish_bounded(
            self.publisher.clone(),
            topic.to_string(),
            order_id.to_string(),
            payload,
            MessageHeaders::from(trace),
            self.publish_timeout,
        )
        .await
    }

    fn record_duplicate(&self, detected_by: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_duplicate_order(detected_by);
        }
    }
}

fn stored_id(order: &Order) -> Result<i64, OrderServiceError> {
    order
        .id()
        .ok_or_else(|| StoreError::Corrupt("stored order has no id".to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderLineInput;
    use crate::messaging::PublishError;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Barrier;

    #[derive(Default)]
    struct RecordingPublisher {
        sent: Mutex<Vec<(String, String, Vec<u8>, MessageHeaders)>>,
        available: bool,
    }

    impl RecordingPublisher {
        fn up() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                available: true,
            }
        }

        fn down() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn try_publish(
            &self,
            topic: &str,
            key: &str,
            payload: &[u8],
            headers: &MessageHeaders,
        ) -> Result<bool, PublishError> {
            if !self.available {
                return Ok(false);
            }
            self.sent.lock().unwrap().push((
                topic.to_string(),
                key.to_string(),
                payload.to_vec(),
                headers.clone(),
            ));
            Ok(true)
        }
    }

    fn dec(value: &str) -> Decimal {
        value.parse().unwrap()
    }

    fn handler(
        store: &Arc<InMemoryStore>,
        publisher: Arc<RecordingPublisher>,
    ) -> OrderCommandHandler {
        OrderCommandHandler::new(
            store.clone(),
            store.clone(),
            store.clone(),
            publisher,
            OrderTopics::default(),
            Duration::from_secs(1),
        )
    }

    fn create(items: Vec<OrderLineInput>) -> CreateOrder {
        CreateOrder {
            customer_id: 1,
            payment_condition_id: 1,
            order_date: Some(Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()),
            items,
            trace: TraceContext::new("corr-123"),
        }
    }

    #[tokio::test]
    async fn test_create_order_above_threshold_needs_approval() {
        let store = Arc::new(InMemoryStore::seeded());
        let publisher = Arc::new(RecordingPublisher::up());
        let handler = handler(&store, publisher.clone());

        let order = handler
            .create_order(create(vec![OrderLineInput::new("A", 26, dec("200.00"))]))
            .await
            .unwrap();

        assert_eq!(order.total_amount(), dec("5200.00"));
        assert_eq!(order.status(), OrderStatus::Created);
        assert!(order.requires_manual_approval());

        let sent = publisher.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (topic, key, payload, headers) = &sent[0];
        assert_eq!(topic, "order-created");
        assert_eq!(key, &order.id().unwrap().to_string());
        assert_eq!(headers.correlation_id(), Some("corr-123"));
        let event: OrderCreatedEvent = serde_json::from_slice(payload).unwrap();
        assert_eq!(event.order_id, order.id().unwrap());
    }

    #[tokio::test]
    async fn test_unknown_customer_is_not_found() {
        let store = Arc::new(InMemoryStore::seeded());
        let handler = handler(&store, Arc::new(RecordingPublisher::up()));
        let mut command = create(vec![OrderLineInput::new("A", 1, dec("1.00"))]);
        command.customer_id = 999;

        let result = handler.create_order(command).await;

        assert!(matches!(
            result,
            Err(OrderServiceError::NotFound { entity: "Customer", id: 999 })
        ));
    }

    #[tokio::test]
    async fn test_unknown_payment_condition_is_not_found() {
        let store = Arc::new(InMemoryStore::seeded());
        let handler = handler(&store, Arc::new(RecordingPublisher::up()));
        let mut command = create(vec![OrderLineInput::new("A", 1, dec("1.00"))]);
        command.payment_condition_id = 999;

        let result = handler.create_order(command).await;

        assert!(matches!(
            result,
            Err(OrderServiceError::NotFound { entity: "PaymentCondition", .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_line_is_rejected_before_storage() {
        let store = Arc::new(InMemoryStore::seeded());
        let handler = handler(&store, Arc::new(RecordingPublisher::up()));

        let result = handler
            .create_order(create(vec![OrderLineInput::new("A", 0, dec("1.00"))]))
            .await;

        assert!(matches!(
            result,
            Err(OrderServiceError::Order(OrderError::OutOfRange { .. }))
        ));
        assert_eq!(store.order_count(), 0);
    }

    #[tokio::test]
    async fn test_resubmission_is_duplicate_of_first_order() {
        let store = Arc::new(InMemoryStore::seeded());
        let handler = handler(&store, Arc::new(RecordingPublisher::up()));
        let items = vec![
            OrderLineInput::new("A", 2, dec("10.00")),
            OrderLineInput::new("B", 1, dec("5.00")),
        ];

        let first = handler.create_order(create(items)).await.unwrap();
        // Same content, different item order
        let second = handler
            .create_order(create(vec![
                OrderLineInput::new("B", 1, dec("5.00")),
                OrderLineInput::new("A", 2, dec("10.00")),
            ]))
            .await;

        match second {
            Err(OrderServiceError::DuplicateOrder(id)) => assert_eq!(Some(id), first.id()),
            other => panic!("expected DuplicateOrder, got {:?}", other.map(|o| o.id())),
        }
        assert_eq!(store.order_count(), 1);
    }

    /// Pre-check always misses, as if a concurrent request had not committed
    /// yet. After a lost insert the winner becomes visible unless hidden.
    struct BlindPreCheck {
        inner: Arc<InMemoryStore>,
        hide_winner: bool,
        lost_insert: AtomicBool,
    }

    impl BlindPreCheck {
        fn new(inner: Arc<InMemoryStore>, hide_winner: bool) -> Self {
            Self {
                inner,
                hide_winner,
                lost_insert: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl OrderRepository for BlindPreCheck {
        async fn get_by_id(&self, id: i64) -> Result<Option<Order>, StoreError> {
            self.inner.get_by_id(id).await
        }

        async fn get_by_idempotency_key(&self, key: &str) -> Result<Option<Order>, StoreError> {
            if self.hide_winner || !self.lost_insert.load(Ordering::SeqCst) {
                return Ok(None);
            }
            self.inner.get_by_idempotency_key(key).await
        }

        async fn insert(&self, order: &Order) -> Result<i64, StoreError> {
            let result = self.inner.insert(order).await;
            if matches!(&result, Err(e) if e.is_uniqueness_violation()) {
                self.lost_insert.store(true, Ordering::SeqCst);
            }
            result
        }

        async fn save_approved_state(&self, order: &Order, expected: OrderStatus) -> Result<(), StoreError> {
            self.inner.save_approved_state(order, expected).await
        }

        async fn save_cancelled_state(&self, order: &Order, expected: OrderStatus) -> Result<(), StoreError> {
            self.inner.save_cancelled_state(order, expected).await
        }
    }

    /// Holds the first two `get_by_id` calls until both have read, so both
    /// callers act on the same snapshot. Later reads pass straight through.
    struct LockstepReads {
        inner: Arc<InMemoryStore>,
        barrier: Barrier,
        reads: AtomicU32,
    }

    #[async_trait]
    impl OrderRepository for LockstepReads {
        async fn get_by_id(&self, id: i64) -> Result<Option<Order>, StoreError> {
            let order = self.inner.get_by_id(id).await;
            if self.reads.fetch_add(1, Ordering::SeqCst) < 2 {
                self.barrier.wait().await;
            }
            order
        }

        async fn get_by_idempotency_key(&self, key: &str) -> Result<Option<Order>, StoreError> {
            self.inner.get_by_idempotency_key(key).await
        }

        async fn insert(&self, order: &Order) -> Result<i64, StoreError> {
            self.inner.insert(order).await
        }

        async fn save_approved_state(&self, order: &Order, expected: OrderStatus) -> Result<(), StoreError> {
            self.inner.save_approved_state(order, expected).await
        }

        async fn save_cancelled_state(&self, order: &Order, expected: OrderStatus) -> Result<(), StoreError> {
            self.inner.save_cancelled_state(order, expected).await
        }
    }

    /// Store a Created order directly, then build a handler whose reads
    /// proceed in lockstep pairs
    async fn lockstep_handler(store: &Arc<InMemoryStore>) -> (OrderCommandHandler, i64) {
        let mut order = Order::create(
            1,
            1,
            None,
            vec![OrderLineInput::new("A", 26, dec("200.00"))],
        )
        .unwrap();
        order.set_idempotency_key("lockstep").unwrap();
        let order_id = store.insert(&order).await.unwrap();

        let handler = OrderCommandHandler::new(
            store.clone(),
            store.clone(),
            Arc::new(LockstepReads {
                inner: store.clone(),
                barrier: Barrier::new(2),
                reads: AtomicU32::new(0),
            }),
            Arc::new(RecordingPublisher::up()),
            OrderTopics::default(),
            Duration::from_secs(1),
        );
        (handler, order_id)
    }

    #[tokio::test]
    async fn test_race_past_pre_check_yields_duplicate_of_winner() {
        let store = Arc::new(InMemoryStore::seeded());
        let orders = Arc::new(BlindPreCheck::new(store.clone(), false));
        let handler = OrderCommandHandler::new(
            store.clone(),
            store.clone(),
            orders,
            Arc::new(RecordingPublisher::up()),
            OrderTopics::default(),
            Duration::from_secs(1),
        );
        let items = || vec![OrderLineInput::new("A", 1, dec("50.00"))];

        let winner = handler.create_order(create(items())).await.unwrap();
        let loser = handler.create_order(create(items())).await;

        match loser {
            Err(OrderServiceError::DuplicateOrder(id)) => assert_eq!(Some(id), winner.id()),
            other => panic!("expected DuplicateOrder, got {:?}", other.map(|o| o.id())),
        }
        assert_eq!(store.order_count(), 1);
    }

    #[tokio::test]
    async fn test_uniqueness_violation_without_winner_surfaces_storage_error() {
        let store = Arc::new(InMemoryStore::seeded());
        let handler = handler(&store, Arc::new(RecordingPublisher::up()));
        let items = || vec![OrderLineInput::new("A", 1, dec("50.00"))];
        handler.create_order(create(items())).await.unwrap();

        let blind = OrderCommandHandler::new(
            store.clone(),
            store.clone(),
            Arc::new(BlindPreCheck::new(store.clone(), true)),
            Arc::new(RecordingPublisher::up()),
            OrderTopics::default(),
            Duration::from_secs(1),
        );

        let result = blind.create_order(create(items())).await;

        assert!(matches!(
            result,
            Err(OrderServiceError::Storage(StoreError::UniqueViolation { .. }))
        ));
    }

    #[tokio::test]
    async fn test_broker_down_does_not_fail_creation() {
        let store = Arc::new(InMemoryStore::seeded());
        let handler = handler(&store, Arc::new(RecordingPublisher::down()));

        let order = handler
            .create_order(create(vec![OrderLineInput::new("A", 1, dec("10.00"))]))
            .await
            .unwrap();

        assert_eq!(order.status(), OrderStatus::Paid);
        assert_eq!(store.order_count(), 1);
    }

    #[tokio::test]
    async fn test_approve_publishes_and_second_approve_fails() {
        let store = Arc::new(InMemoryStore::seeded());
        let publisher = Arc::new(RecordingPublisher::up());
        let handler = handler(&store, publisher.clone());
        let order = handler
            .create_order(create(vec![OrderLineInput::new("A", 26, dec("200.00"))]))
            .await
            .unwrap();
        let order_id = order.id().unwrap();

        let approved = handler
            .approve_order(ApproveOrder {
                order_id,
                approved_by: "manager@example.com".into(),
                trace: TraceContext::default(),
            })
            .await
            .unwrap();

        assert_eq!(approved.status(), OrderStatus::Paid);
        assert!(approved.approved_at().is_some());
        assert_eq!(
            handler.get_order(order_id).await.unwrap().status(),
            OrderStatus::Paid
        );

        {
            let sent = publisher.sent.lock().unwrap();
            assert_eq!(sent.len(), 2);
            assert_eq!(sent[1].0, "order-approved");
            let event: OrderApprovedEvent = serde_json::from_slice(&sent[1].2).unwrap();
            assert_eq!(event.status, OrderStatus::Paid);
        }

        let again = handler
            .approve_order(ApproveOrder {
                order_id,
                approved_by: "someone-else".into(),
                trace: TraceContext::default(),
            })
            .await;

        assert!(matches!(
            again,
            Err(OrderServiceError::Order(OrderError::InvalidState { .. }))
        ));
        let stored = handler.get_order(order_id).await.unwrap();
        assert_eq!(stored.approved_by(), Some("manager@example.com"));
    }

    #[tokio::test]
    async fn test_cancel_paid_order_fails() {
        let store = Arc::new(InMemoryStore::seeded());
        let handler = handler(&store, Arc::new(RecordingPublisher::up()));
        let order = handler
            .create_order(create(vec![OrderLineInput::new("A", 1, dec("10.00"))]))
            .await
            .unwrap();

        let result = handler
            .cancel_order(CancelOrder {
                order_id: order.id().unwrap(),
            })
            .await;

        assert!(matches!(
            result,
            Err(OrderServiceError::Order(OrderError::InvalidState { .. }))
        ));
    }

    #[tokio::test]
    async fn test_cancel_created_order_twice() {
        let store = Arc::new(InMemoryStore::seeded());
        let handler = handler(&store, Arc::new(RecordingPublisher::up()));
        let order = handler
            .create_order(create(vec![OrderLineInput::new("A", 26, dec("200.00"))]))
            .await
            .unwrap();
        let order_id = order.id().unwrap();

        let cancelled = handler.cancel_order(CancelOrder { order_id }).await.unwrap();
        let again = handler.cancel_order(CancelOrder { order_id }).await.unwrap();

        assert_eq!(cancelled.status(), OrderStatus::Cancelled);
        assert_eq!(again.status(), OrderStatus::Cancelled);
        assert_eq!(
            handler.get_order(order_id).await.unwrap().status(),
            OrderStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_concurrent_approve_and_cancel_leave_one_consistent_state() {
        let store = Arc::new(InMemoryStore::seeded());
        let (handler, order_id) = lockstep_handler(&store).await;

        let (approved, cancelled) = tokio::join!(
            handler.approve_order(ApproveOrder {
                order_id,
                approved_by: "supervisor".into(),
                trace: TraceContext::default(),
            }),
            handler.cancel_order(CancelOrder { order_id }),
        );

        let stored = store.get_by_id(order_id).await.unwrap().unwrap();
        match (approved, cancelled) {
            (Ok(order), Err(OrderServiceError::Order(OrderError::InvalidState { action, status }))) => {
                assert_eq!(order.status(), OrderStatus::Paid);
                assert_eq!(action, "cancel");
                assert_eq!(status, OrderStatus::Paid);
                assert_eq!(stored.status(), OrderStatus::Paid);
                assert_eq!(stored.approved_by(), Some("supervisor"));
            }
            (Err(OrderServiceError::Order(OrderError::InvalidState { action, status })), Ok(order)) => {
                assert_eq!(order.status(), OrderStatus::Cancelled);
                assert_eq!(action, "approve");
                assert_eq!(status, OrderStatus::Cancelled);
                assert_eq!(stored.status(), OrderStatus::Cancelled);
                assert_eq!(stored.approved_by(), None);
                assert_eq!(stored.approved_at(), None);
            }
            other => panic!("expected exactly one transition to win, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_approvals_stamp_once() {
        let store = Arc::new(InMemoryStore::seeded());
        let (handler, order_id) = lockstep_handler(&store).await;

        let approve = |by: &str| ApproveOrder {
            order_id,
            approved_by: by.to_string(),
            trace: TraceContext::default(),
        };
        let (first, second) = tokio::join!(
            handler.approve_order(approve("alice")),
            handler.approve_order(approve("bob")),
        );

        let winner = match (first, second) {
            (Ok(order), Err(OrderServiceError::Order(OrderError::InvalidState { .. })))
            | (Err(OrderServiceError::Order(OrderError::InvalidState { .. })), Ok(order)) => order,
            other => panic!("expected exactly one approval, got {:?}", other),
        };

        let stored = store.get_by_id(order_id).await.unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Paid);
        assert_eq!(stored.approved_by(), winner.approved_by());
    }

    #[tokio::test]
    async fn test_concurrent_cancels_both_return_cancelled() {
        let store = Arc::new(InMemoryStore::seeded());
        let (handler, order_id) = lockstep_handler(&store).await;

        let (first, second) = tokio::join!(
            handler.cancel_order(CancelOrder { order_id }),
            handler.cancel_order(CancelOrder { order_id }),
        );

        assert_eq!(first.unwrap().status(), OrderStatus::Cancelled);
        assert_eq!(second.unwrap().status(), OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_stored_order_without_id_is_corrupt() {
        struct IdlessOrders(Arc<InMemoryStore>);

        #[async_trait]
        impl OrderRepository for IdlessOrders {
            async fn get_by_id(&self, id: i64) -> Result<Option<Order>, StoreError> {
                self.0.get_by_id(id).await
            }

            async fn get_by_idempotency_key(&self, _key: &str) -> Result<Option<Order>, StoreError> {
                Ok(Some(
                    Order::create(1, 1, None, vec![OrderLineInput::new("A", 1, dec("1.00"))]).unwrap(),
                ))
            }

            async fn insert(&self, order: &Order) -> Result<i64, StoreError> {
                self.0.insert(order).await
            }

            async fn save_approved_state(&self, order: &Order, expected: OrderStatus) -> Result<(), StoreError> {
                self.0.save_approved_state(order, expected).await
            }

            async fn save_cancelled_state(&self, order: &Order, expected: OrderStatus) -> Result<(), StoreError> {
                self.0.save_cancelled_state(order, expected).await
            }
        }

        let store = Arc::new(InMemoryStore::seeded());
        let handler = OrderCommandHandler::new(
            store.clone(),
            store.clone(),
            Arc::new(IdlessOrders(store.clone())),
            Arc::new(RecordingPublisher::up()),
            OrderTopics::default(),
            Duration::from_secs(1),
        );

        let result = handler
            .create_order(create(vec![OrderLineInput::new("A", 1, dec("1.00"))]))
            .await;

        assert!(matches!(
            result,
            Err(OrderServiceError::Storage(StoreError::Corrupt(_)))
        ));
    }

    #[tokio::test]
    async fn test_get_missing_order() {
        let store = Arc::new(InMemoryStore::seeded());
        let handler = handler(&store, Arc::new(RecordingPublisher::up()));

        assert!(matches!(
            handler.get_order(5).await,
            Err(OrderServiceError::NotFound { entity: "Order", id: 5 })
        ));
    }

    #[tokio::test]
    async fn test_unavailable_store_maps_to_unavailable() {
        let store = Arc::new(InMemoryStore::seeded());
        store.set_unavailable(true);
        let handler = handler(&store, Arc::new(RecordingPublisher::up()));

        let result = handler
            .create_order(create(vec![OrderLineInput::new("A", 1, dec("10.00"))]))
            .await;

        assert!(matches!(result, Err(OrderServiceError::Unavailable(_))));
    }
}
