// ============================================================================
// Messaging - Broker seams
// ============================================================================
//
// Two traits, two layers:
// - MessageTransport: one raw send (or metadata probe) against the broker
// - EventPublisher:   TryPublish(topic, key, payload, headers) -> sent
//
// `ResilientPublisher` turns a transport into a publisher (retry + circuit
// breaker). The order command handler and the consumer's DLQ forwarder both
// depend only on `EventPublisher`.
//
// ============================================================================

mod headers;
mod publisher;
mod redpanda;

pub use headers::*;
pub use publisher::{publish_bounded, PublishOutcome, ResilientPublisher};
pub use redpanda::RedpandaClient;

use async_trait::async_trait;
use std::time::Duration;

use crate::utils::IsTransient;

const MAX_TOPIC_LEN: usize = 249;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    /// Broker did not take the message (timeout, connection, leader change)
    #[error("Broker send failed: {0}")]
    Send(String),

    /// Broker refused the message itself; resending the same bytes cannot help
    #[error("Broker rejected message: {0}")]
    Rejected(String),

    #[error("Broker unreachable: {0}")]
    Unreachable(String),
}

impl IsTransient for TransportError {
    fn is_transient(&self) -> bool {
        !matches!(self, TransportError::Rejected(_))
    }
}

/// Programmer errors only; broker unavailability is reported as `Ok(false)`
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PublishError {
    #[error("Invalid topic name {topic:?}: {reason}")]
    InvalidTopic { topic: String, reason: &'static str },
}

#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        headers: &MessageHeaders,
    ) -> Result<(), TransportError>;

    /// Metadata round-trip bounded by `timeout`
    async fn probe(&self, timeout: Duration) -> Result<(), TransportError>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Returns `Ok(true)` when the broker acknowledged the message and
    /// `Ok(false)` when it could not be delivered.
    async fn try_publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        headers: &MessageHeaders,
    ) -> Result<bool, PublishError>;
}

/// Kafka topic naming rules
pub fn validate_topic(topic: &str) -> Result<(), PublishError> {
    let invalid = |reason| PublishError::InvalidTopic {
        topic: topic.to_string(),
        reason,
    };

    if topic.is_empty() {
        return Err(invalid("empty"));
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(invalid("longer than 249 characters"));
    }
    if topic == "." || topic == ".." {
        return Err(invalid("reserved name"));
    }
    if !topic
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(invalid("only [a-zA-Z0-9._-] allowed"));
    }
    Ok(())
}
