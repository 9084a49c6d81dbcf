use std::sync::Arc;
use async_trait::async_trait;

use crate::consumer::{EventHandler, MessageContext};
use crate::domain::order::OrderCreatedEvent;
use crate::metrics::Metrics;
use crate::store::{DeliveryCommitmentRepository, OrderRepository};

use super::errors::DeliveryError;
use super::value_objects::{DeliveryCommitment, DeliveryPolicy};

// ============================================================================
// Delivery Commitment Handler
// ============================================================================
//
// Idempotent side effect of an order-created event:
//   commitment exists?  -> no-op
//   order missing?      -> permanent failure
//   otherwise           -> persist order_date + delivery_days
//
// The unique index on order_id backstops the check-then-insert race: losing
// the race is reported as AlreadyExists, not as an error.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum CommitmentOutcome {
    Created(DeliveryCommitment),
    AlreadyExists,
}

pub struct DeliveryCommitmentHandler {
    orders: Arc<dyn OrderRepository>,
    commitments: Arc<dyn DeliveryCommitmentRepository>,
    policy: DeliveryPolicy,
    metrics: Option<Arc<Metrics>>,
}

impl DeliveryCommitmentHandler {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        commitments: Arc<dyn DeliveryCommitmentRepository>,
        policy: DeliveryPolicy,
    ) -> Self {
        Self {
            orders,
            commitments,
            policy,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn commit_delivery(&self, order_id: i64) -> Result<CommitmentOutcome, DeliveryError> {
        if self.commitments.get_by_order_id(order_id).await?.is_some() {
            tracing::info!(order_id = order_id, "Delivery commitment already exists, skipping");
            return Ok(CommitmentOutcome::AlreadyExists);
        }

        let order = self
            .orders
            .get_by_id(order_id)
            .await?
            .ok_or(DeliveryError::OrderNotFound(order_id))?;

        let mut commitment = DeliveryCommitment::for_order(order_id, order.order_date(), self.policy);

        match self.commitments.insert_commitment(&commitment).await {
            Ok(id) => {
                commitment.id = Some(id);
                tracing::info!(
                    order_id = order_id,
                    commitment_id = id,
                    estimated_delivery_date = %commitment.estimated_delivery_date,
                    "✅ Delivery commitment created"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_commitment_created();
                }
                Ok(CommitmentOutcome::Created(commitment))
            }
            Err(e) if e.is_uniqueness_violation() => {
                tracing::info!(
                    order_id = order_id,
                    "Concurrent delivery commitment won the insert, treating as done"
                );
                Ok(CommitmentOutcome::AlreadyExists)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl EventHandler for DeliveryCommitmentHandler {
    type Event = OrderCreatedEvent;
    type Error = DeliveryError;

    fn name(&self) -> &'static str {
        "delivery_commitment"
    }

    fn event_key(event: &Self::Event) -> String {
        event.order_id.to_string()
    }

    async fn handle(&self, event: &Self::Event, ctx: &MessageContext) -> Result<(), Self::Error> {
        tracing::debug!(
            order_id = event.order_id,
            correlation_id = %ctx.correlation_id,
            "Handling order-created event"
        );
        self.commit_delivery(event.order_id).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{Order, OrderLineInput};
    use crate::store::{InMemoryStore, StoreError};
    use chrono::{TimeZone, Utc};

    async fn store_with_order() -> (Arc<InMemoryStore>, i64, Order) {
        let store = Arc::new(InMemoryStore::new());
        let date = Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap();
        let mut order = Order::create(
            1,
            1,
            Some(date),
            vec![OrderLineInput::new("A", 1, "10.00".parse().unwrap())],
        )
        .unwrap();
        order.set_idempotency_key("key-1").unwrap();
        let id = OrderRepository::insert(store.as_ref(), &order).await.unwrap();
        order.assign_id(id);
        (store, id, order)
    }

    fn handler(store: &Arc<InMemoryStore>) -> DeliveryCommitmentHandler {
        DeliveryCommitmentHandler::new(store.clone(), store.clone(), DeliveryPolicy::new(5))
    }

    #[tokio::test]
    async fn test_creates_commitment_from_order_date() {
        let (store, id, order) = store_with_order().await;

        let outcome = handler(&store).commit_delivery(id).await.unwrap();

        let CommitmentOutcome::Created(commitment) = outcome else {
            panic!("expected a new commitment");
        };
        assert_eq!(commitment.order_id, id);
        assert_eq!(commitment.delivery_days, 5);
        assert_eq!(
            commitment.estimated_delivery_date,
            order.order_date() + chrono::Duration::days(5)
        );
        assert!(store.get_by_order_id(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_second_delivery_is_a_noop() {
        let (store, id, _) = store_with_order().await;
        let handler = handler(&store);

        handler.commit_delivery(id).await.unwrap();
        let second = handler.commit_delivery(id).await.unwrap();

        assert_eq!(second, CommitmentOutcome::AlreadyExists);
        assert_eq!(store.commitment_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_order_is_permanent_failure() {
        let store = Arc::new(InMemoryStore::new());

        let result = handler(&store).commit_delivery(404).await;

        assert_eq!(result, Err(DeliveryError::OrderNotFound(404)));
        assert_eq!(store.commitment_count(), 0);
    }

    #[tokio::test]
    async fn test_lost_insert_race_is_treated_as_done() {
        let (store, id, order) = store_with_order().await;

        // Another worker inserts between our lookup and our insert
        struct RacingCommitments {
            inner: Arc<InMemoryStore>,
            order_date: chrono::DateTime<Utc>,
        }

        #[async_trait]
        impl DeliveryCommitmentRepository for RacingCommitments {
            async fn get_by_order_id(
                &self,
                _order_id: i64,
            ) -> Result<Option<DeliveryCommitment>, StoreError> {
                Ok(None)
            }

            async fn insert_commitment(
                &self,
                commitment: &DeliveryCommitment,
            ) -> Result<i64, StoreError> {
                let winner = DeliveryCommitment::for_order(
                    commitment.order_id,
                    self.order_date,
                    DeliveryPolicy::default(),
                );
                self.inner.insert_commitment(&winner).await?;
                self.inner.insert_commitment(commitment).await
            }
        }

        let racing = Arc::new(RacingCommitments {
            inner: store.clone(),
            order_date: order.order_date(),
        });
        let handler = DeliveryCommitmentHandler::new(store.clone(), racing, DeliveryPolicy::new(5));

        let outcome = handler.commit_delivery(id).await.unwrap();

        assert_eq!(outcome, CommitmentOutcome::AlreadyExists);
        assert_eq!(store.commitment_count(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_store_is_transient() {
        let store = Arc::new(InMemoryStore::new());
        store.set_unavailable(true);

        let result = handler(&store).commit_delivery(1).await;

        let err = result.unwrap_err();
        assert!(crate::utils::IsTransient::is_transient(&err));
    }
}
