use std::sync::Arc;

use crate::messaging::{
    EventPublisher, MessageHeaders, CORRELATION_ID, DLQ_REASON, ORIGINAL_OFFSET,
    ORIGINAL_PARTITION, ORIGINAL_TOPIC,
};
use crate::metrics::Metrics;

use super::source::InboundMessage;

// ============================================================================
// Dead Letter Forwarder
// ============================================================================
//
// Quarantines messages that can never succeed. The payload and key go out
// byte-for-byte; provenance travels in headers only.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DlqReason {
    DecodeFailure,
    RetriesExhausted,
    PermanentFailure,
}

impl DlqReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DlqReason::DecodeFailure => "decode_failure",
            DlqReason::RetriesExhausted => "retries_exhausted",
            DlqReason::PermanentFailure => "permanent_failure",
        }
    }
}

pub struct DeadLetterForwarder {
    publisher: Arc<dyn EventPublisher>,
    topic: String,
    metrics: Option<Arc<Metrics>>,
}

impl DeadLetterForwarder {
    pub fn new(publisher: Arc<dyn EventPublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns `true` once the broker has the dead letter
    pub async fn forward(
        &self,
        message: &InboundMessage,
        reason: DlqReason,
        correlation_id: &str,
        detail: &str,
    ) -> bool {
        let headers = dead_letter_headers(message, reason, correlation_id);
        let key = message.key_str().unwrap_or_default();

        match self
            .publisher
            .try_publish(&self.topic, key, &message.payload, &headers)
            .await
        {
            Ok(true) => {
                tracing::error!(
                    dlq_topic = %self.topic,
                    original_topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    reason = reason.as_str(),
                    correlation_id = %correlation_id,
                    detail = %detail,
                    "💀 Message routed to DLQ"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_dlq_message(reason.as_str());
                }
                true
            }
            Ok(false) => {
                tracing::error!(
                    dlq_topic = %self.topic,
                    offset = message.offset,
                    reason = reason.as_str(),
                    "DLQ publish not acknowledged"
                );
                false
            }
            Err(e) => {
                tracing::error!(dlq_topic = %self.topic, error = %e, "DLQ publish rejected");
                false
            }
        }
    }
}

fn dead_letter_headers(message: &InboundMessage, reason: DlqReason, correlation_id: &str) -> MessageHeaders {
    let mut headers = message.headers.clone();
    headers.insert(CORRELATION_ID, correlation_id);
    headers.insert(DLQ_REASON, reason.as_str());
    headers.insert(ORIGINAL_TOPIC, message.topic.clone());
    headers.insert(ORIGINAL_PARTITION, message.partition.to_string());
    headers.insert(ORIGINAL_OFFSET, message.offset.to_string());
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{PublishError, CAUSATION_ID};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Capture {
        sent: Mutex<Vec<(String, String, Vec<u8>, MessageHeaders)>>,
    }

    #[async_trait]
    impl EventPublisher for Capture {
        async fn try_publish(
            &self,
            topic: &str,
            key: &str,
            payload: &[u8],
            headers: &MessageHeaders,
        ) -> Result<bool, PublishError> {
            self.sent.lock().unwrap().push((
                topic.to_string(),
                key.to_string(),
                payload.to_vec(),
                headers.clone(),
            ));
            Ok(true)
        }
    }

    fn poison() -> InboundMessage {
        InboundMessage {
            topic: "order-created".into(),
            partition: 2,
            offset: 41,
            key: Some(b"17".to_vec()),
            payload: vec![0xff, 0x00, b'{'],
            headers: MessageHeaders::new().with(CAUSATION_ID, "cause-9"),
        }
    }

    #[tokio::test]
    async fn test_forwards_payload_verbatim_with_provenance() {
        let capture = Arc::new(Capture::default());
        let forwarder = DeadLetterForwarder::new(capture.clone(), "order-created-dlq");

        assert!(forwarder
            .forward(&poison(), DlqReason::DecodeFailure, "corr-1", "expected value")
            .await);

        let sent = capture.sent.lock().unwrap();
        let (topic, key, payload, headers) = &sent[0];
        assert_eq!(topic, "order-created-dlq");
        assert_eq!(key, "17");
        assert_eq!(payload, &vec![0xff, 0x00, b'{']);
        assert_eq!(headers.get(DLQ_REASON), Some("decode_failure"));
        assert_eq!(headers.get(ORIGINAL_TOPIC), Some("order-created"));
        assert_eq!(headers.get(ORIGINAL_PARTITION), Some("2"));
        assert_eq!(headers.get(ORIGINAL_OFFSET), Some("41"));
        assert_eq!(headers.get(CORRELATION_ID), Some("corr-1"));
        assert_eq!(headers.get(CAUSATION_ID), Some("cause-9"));
    }
}
