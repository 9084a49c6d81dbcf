use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::metrics::Metrics;
use crate::utils::{
    call_with_policy, retry_on_transient, CircuitBreakerError, CircuitPolicy, CircuitState,
    IsTransient, RetryConfig, RetryResult,
};

use super::{
    validate_topic, EventPublisher, MessageHeaders, MessageTransport, PublishError, TransportError,
};

// ============================================================================
// Resilient Publisher
// ============================================================================
//
// Each attempt goes through the shared circuit breaker:
//   closed    -> send; the result is sampled by the breaker
//   open      -> fail fast without touching the broker (not retried)
//   half-open -> a single probe send decides close vs reopen
//
// Transport failures that are transient are retried with exponential backoff
// and jitter. Whatever happens, the caller gets `Ok(sent)`; only a malformed
// topic is an `Err`.
//
// ============================================================================

#[derive(Debug)]
enum AttemptError {
    CircuitOpen,
    Transport(TransportError),
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::CircuitOpen => write!(f, "Circuit breaker is open"),
            AttemptError::Transport(e) => write!(f, "{}", e),
        }
    }
}

impl IsTransient for AttemptError {
    fn is_transient(&self) -> bool {
        match self {
            AttemptError::CircuitOpen => false,
            AttemptError::Transport(e) => e.is_transient(),
        }
    }
}

impl From<CircuitBreakerError<TransportError>> for AttemptError {
    fn from(e: CircuitBreakerError<TransportError>) -> Self {
        match e {
            CircuitBreakerError::CircuitOpen => AttemptError::CircuitOpen,
            CircuitBreakerError::OperationFailed(e) => AttemptError::Transport(e),
        }
    }
}

pub struct ResilientPublisher {
    transport: Arc<dyn MessageTransport>,
    breaker: Arc<dyn CircuitPolicy>,
    retry: RetryConfig,
    metrics: Option<Arc<Metrics>>,
}

impl ResilientPublisher {
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        breaker: Arc<dyn CircuitPolicy>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            transport,
            breaker,
            retry,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.breaker.state().await
    }

    async fn attempt(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        headers: &MessageHeaders,
    ) -> Result<(), AttemptError> {
        let before = self.breaker.state().await;

        let result = call_with_policy(
            self.breaker.as_ref(),
            async {
                if let Some(metrics) = &self.metrics {
                    metrics.record_publish_attempt(topic);
                }
                self.transport.send(topic, key, payload, headers).await
            },
        )
        .await;

        let after = self.breaker.state().await;
        if before != after {
            if after == CircuitState::Open {
                tracing::warn!(topic = %topic, from = before.as_str(), "⚡ Publish circuit opened");
            } else {
                tracing::info!(
                    topic = %topic,
                    from = before.as_str(),
                    to = after.as_str(),
                    "Publish circuit state changed"
                );
            }
            if let Some(metrics) = &self.metrics {
                metrics.record_circuit_transition(before, after);
            }
        }

        result.map_err(AttemptError::from)
    }

    fn record_outcome(&self, topic: &str, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_publish_outcome(topic, outcome);
        }
    }
}

#[async_trait]
impl EventPublisher for ResilientPublisher {
    async fn try_publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        headers: &MessageHeaders,
    ) -> Result<bool, PublishError> {
        validate_topic(topic)?;

        let result = retry_on_transient(self.retry.clone(), |attempt| async move {
            tracing::debug!(topic = %topic, key = %key, attempt = attempt, "Publishing");
            self.attempt(topic, key, payload, headers).await
        })
        .await;

        match result {
            RetryResult::Success(()) => {
                tracing::info!(topic = %topic, key = %key, "Published to Redpanda");
                self.record_outcome(topic, "sent");
                Ok(true)
            }
            RetryResult::PermanentFailure(AttemptError::CircuitOpen)
            | RetryResult::Failed(AttemptError::CircuitOpen) => {
                tracing::warn!(
                    topic = %topic,
                    key = %key,
                    "Circuit breaker open - message not sent"
                );
                self.record_outcome(topic, "circuit_open");
                Ok(false)
            }
            RetryResult::Failed(e)
            | RetryResult::PermanentFailure(e)
            | RetryResult::Cancelled(e) => {
                tracing::error!(
                    topic = %topic,
                    key = %key,
                    error = %e,
                    "Failed to publish to Redpanda"
                );
                self.record_outcome(topic, "failed");
                Ok(false)
            }
        }
    }
}

// ============================================================================
// Bounded publication task
// ============================================================================

/// Result of a publication run as a bounded background task
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Sent,
    NotSent,
    /// Programmer error or a panic inside the publish task
    Failed(String),
    TimedOut,
}

impl PublishOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishOutcome::Sent => "sent",
            PublishOutcome::NotSent => "not_sent",
            PublishOutcome::Failed(_) => "failed",
            PublishOutcome::TimedOut => "timed_out",
        }
    }
}

/// Run one publication on its own task, waiting at most `timeout`.
///
/// A panic in the task and an elapsed timeout both come back as outcomes;
/// nothing propagates to the caller. On timeout the task is aborted and an
/// attempt cut short counts as a breaker failure.
pub async fn publish_bounded(
    publisher: Arc<dyn EventPublisher>,
    topic: String,
    key: String,
    payload: Vec<u8>,
    headers: MessageHeaders,
    timeout: Duration,
) -> PublishOutcome {
    let log_topic = topic.clone();
    let log_key = key.clone();

    let mut handle = tokio::spawn(async move {
        publisher.try_publish(&topic, &key, &payload, &headers).await
    });

    let outcome = match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(Ok(true))) => PublishOutcome::Sent,
        Ok(Ok(Ok(false))) => PublishOutcome::NotSent,
        Ok(Ok(Err(e))) => PublishOutcome::Failed(e.to_string()),
        Ok(Err(join_error)) => PublishOutcome::Failed(format!("publish task failed: {}", join_error)),
        Err(_) => {
            handle.abort();
            PublishOutcome::TimedOut
        }
    };

    match &outcome {
        PublishOutcome::Sent => {
            tracing::info!(topic = %log_topic, key = %log_key, "✅ Event published");
        }
        PublishOutcome::NotSent => {
            tracing::warn!(
                topic = %log_topic,
                key = %log_key,
                "Event not sent, needs reconciliation"
            );
        }
        PublishOutcome::Failed(reason) => {
            tracing::error!(
                topic = %log_topic,
                key = %log_key,
                error = %reason,
                "Event publication errored, needs reconciliation"
            );
        }
        PublishOutcome::TimedOut => {
            tracing::warn!(
                topic = %log_topic,
                key = %log_key,
                timeout_ms = timeout.as_millis() as u64,
                "Event publication timed out, needs reconciliation"
            );
        }
    }

    outcome
}
