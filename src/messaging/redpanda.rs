use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    error::{KafkaError, RDKafkaErrorCode},
    message::{Header, OwnedHeaders},
    producer::{FutureProducer, FutureRecord, Producer},
    util::Timeout,
};
use std::time::Duration;

use super::{MessageHeaders, MessageTransport, TransportError};

/// Raw Redpanda/Kafka transport. Retry and circuit breaking live in
/// `ResilientPublisher`; this type does exactly one send per call.
pub struct RedpandaClient {
    producer: FutureProducer,
    send_timeout: Duration,
}

impl RedpandaClient {
    pub fn new(brokers: &str, send_timeout: Duration) -> Result<Self, TransportError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", send_timeout.as_millis().to_string())
            .set("enable.idempotence", "true")
            .create()
            .map_err(|e| TransportError::Unreachable(format!("Failed to create Redpanda producer: {}", e)))?;

        Ok(Self {
            producer,
            send_timeout,
        })
    }
}

fn classify(error: KafkaError) -> TransportError {
    match error {
        KafkaError::MessageProduction(
            code @ (RDKafkaErrorCode::MessageSizeTooLarge
            | RDKafkaErrorCode::InvalidMessage
            | RDKafkaErrorCode::TopicAuthorizationFailed),
        ) => TransportError::Rejected(code.to_string()),
        other => TransportError::Send(other.to_string()),
    }
}

#[async_trait]
impl MessageTransport for RedpandaClient {
    async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        headers: &MessageHeaders,
    ) -> Result<(), TransportError> {
        let owned_headers = headers.iter().fold(
            OwnedHeaders::new_with_capacity(headers.len()),
            |acc, (name, value)| {
                acc.insert(Header {
                    key: name,
                    value: Some(value),
                })
            },
        );

        let record = FutureRecord::to(topic)
            .key(key)
            .payload(payload)
            .headers(owned_headers);

        self.producer
            .send(record, Timeout::After(self.send_timeout))
            .await
            .map(|_| ())
            .map_err(|(e, _)| classify(e))?;

        tracing::debug!(topic = %topic, key = %key, "Published to Redpanda");
        Ok(())
    }

    async fn probe(&self, timeout: Duration) -> Result<(), TransportError> {
        let producer = self.producer.clone();

        // librdkafka metadata calls block the calling thread
        tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, Timeout::After(timeout))
                .map(|_| ())
        })
        .await
        .map_err(|e| TransportError::Unreachable(e.to_string()))?
        .map_err(|e| TransportError::Unreachable(e.to_string()))
    }
}
