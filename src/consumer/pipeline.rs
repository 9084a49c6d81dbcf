use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::metrics::Metrics;
use crate::utils::{retry_on_transient_until, RetryConfig, RetryResult};

use super::dlq::{DeadLetterForwarder, DlqReason};
use super::source::{InboundMessage, MessageSource};
use super::{EventHandler, MessageContext};

// ============================================================================
// Message Pipeline - one message, start to finish
// ============================================================================
//
//   decode ──fail──▶ DLQ ──▶ commit
//     │
//   handle (retry transient, backoff + jitter)
//     ├── ok ─────────────────────▶ commit
//     ├── exhausted / permanent ─▶ DLQ ──▶ commit
//     └── shutdown mid-retry ────▶ no commit (redelivered after restart)
//
// A DLQ publish that fails leaves the offset uncommitted and asks the
// dispatcher to redeliver.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Processed,
    DeadLettered(DlqReason),
    /// Not committed; the dispatcher rewinds and backs off
    Redeliver,
    /// Shutdown interrupted a retry; not committed
    Abandoned,
}

impl MessageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageOutcome::Processed => "processed",
            MessageOutcome::DeadLettered(_) => "dead_lettered",
            MessageOutcome::Redeliver => "redeliver",
            MessageOutcome::Abandoned => "abandoned",
        }
    }
}

pub struct MessagePipeline<H: EventHandler> {
    handler: Arc<H>,
    source: Arc<dyn MessageSource>,
    dlq: DeadLetterForwarder,
    retry: RetryConfig,
    metrics: Option<Arc<Metrics>>,
}

impl<H: EventHandler> MessagePipeline<H> {
    pub fn new(
        handler: Arc<H>,
        source: Arc<dyn MessageSource>,
        dlq: DeadLetterForwarder,
        retry: RetryConfig,
    ) -> Self {
        Self {
            handler,
            source,
            dlq,
            retry,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn process(&self, message: &InboundMessage, shutdown: &CancellationToken) -> MessageOutcome {
        let started = Instant::now();
        let correlation_id = message
            .headers
            .correlation_id()
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let span = tracing::info_span!(
            "consume",
            handler = self.handler.name(),
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            correlation_id = %correlation_id,
        );
        let outcome = self
            .run(message, &correlation_id, shutdown)
            .instrument(span)
            .await;

        if let Some(metrics) = &self.metrics {
            metrics.record_consumed(
                &message.topic,
                self.handler.name(),
                outcome.as_str(),
                started.elapsed().as_secs_f64(),
            );
        }
        outcome
    }

    async fn run(
        &self,
        message: &InboundMessage,
        correlation_id: &str,
        shutdown: &CancellationToken,
    ) -> MessageOutcome {
        let event: H::Event = match serde_json::from_slice(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Undecodable payload");
                return self
                    .dead_letter(message, DlqReason::DecodeFailure, correlation_id, &e.to_string())
                    .await;
            }
        };

        let event_key = H::event_key(&event);
        let ctx = MessageContext {
            correlation_id: correlation_id.to_string(),
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
        };

        let handler = self.handler.as_ref();
        let event = &event;
        let ctx = &ctx;
        let result = retry_on_transient_until(self.retry.clone(), shutdown, |attempt| async move {
            tracing::debug!(attempt = attempt, "Handling event");
            handler.handle(event, ctx).await
        })
        .await;

        match result {
            RetryResult::Success(()) => {
                tracing::info!(event_key = %event_key, "✅ Event handled");
                self.commit(message);
                MessageOutcome::Processed
            }
            RetryResult::Failed(e) => {
                self.dead_letter(message, DlqReason::RetriesExhausted, correlation_id, &e.to_string())
                    .await
            }
            RetryResult::PermanentFailure(e) => {
                self.dead_letter(message, DlqReason::PermanentFailure, correlation_id, &e.to_string())
                    .await
            }
            RetryResult::Cancelled(e) => {
                tracing::warn!(
                    event_key = %event_key,
                    error = %e,
                    "Shutdown during retry, leaving offset uncommitted"
                );
                MessageOutcome::Abandoned
            }
        }
    }

    async fn dead_letter(
        &self,
        message: &InboundMessage,
        reason: DlqReason,
        correlation_id: &str,
        detail: &str,
    ) -> MessageOutcome {
        if self.dlq.forward(message, reason, correlation_id, detail).await {
            self.commit(message);
            MessageOutcome::DeadLettered(reason)
        } else {
            MessageOutcome::Redeliver
        }
    }

    fn commit(&self, message: &InboundMessage) {
        // A lost commit means redelivery, which the handler tolerates
        if let Err(e) = self.source.commit(message) {
            tracing::error!(offset = message.offset, error = %e, "Offset commit failed");
        }
    }
}
