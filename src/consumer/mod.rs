// ============================================================================
// Consumer - At-least-once processing with DLQ fallback
// ============================================================================
//
// ConsumerDispatcher (one per topic)
//   ├── ConnectivityGate   store + broker reachable before subscribing
//   ├── MessageSource      recv / commit / rewind, no auto-commit
//   └── MessagePipeline    decode → handle with retry → commit or DLQ
//         ├── EventHandler        business side effect
//         └── DeadLetterForwarder original payload → <topic>-dlq
//
// Offsets only move on: success, decode failure + DLQ, exhausted/permanent
// failure + DLQ. Everything else leaves the message to be redelivered.
//
// ============================================================================

mod connectivity;
mod dispatcher;
mod dlq;
mod kafka_source;
mod pipeline;
mod source;

pub use connectivity::{BrokerReachability, ConnectivityGate, ConnectivityProbe, StoreReachability};
pub use dispatcher::{ConsumerDispatcher, DispatcherConfig};
pub use dlq::{DeadLetterForwarder, DlqReason};
pub use kafka_source::KafkaMessageSource;
pub use pipeline::{MessageOutcome, MessagePipeline};
pub use source::{InboundMessage, MessageSource, SourceError};

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::utils::IsTransient;

/// Per-message context handed to the business handler
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub correlation_id: String,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Business side effect applied to one decoded event
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    type Event: DeserializeOwned + Send + Sync;
    type Error: std::error::Error + IsTransient + Send + Sync;

    /// Label used in logs and metrics
    fn name(&self) -> &'static str;

    /// Business identifier of the event (the order id for order events)
    fn event_key(event: &Self::Event) -> String;

    async fn handle(&self, event: &Self::Event, ctx: &MessageContext) -> Result<(), Self::Error>;
}
