use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    consumer::{CommitMode, Consumer, StreamConsumer},
    message::{BorrowedMessage, Headers, Message},
    util::Timeout,
    Offset, TopicPartitionList,
};
use std::sync::Arc;
use std::time::Duration;

use crate::messaging::MessageHeaders;

use super::connectivity::ConnectivityProbe;
use super::source::{InboundMessage, MessageSource, SourceError};

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Redpanda/Kafka consumer with auto-commit disabled
pub struct KafkaMessageSource {
    consumer: Arc<StreamConsumer>,
    probe_timeout: Duration,
}

impl KafkaMessageSource {
    pub fn new(brokers: &str, group_id: &str, probe_timeout: Duration) -> Result<Self, SourceError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "10000")
            .create()
            .map_err(|e| SourceError::Subscribe(format!("Failed to create consumer: {}", e)))?;

        Ok(Self {
            consumer: Arc::new(consumer),
            probe_timeout,
        })
    }
}

fn to_inbound(message: &BorrowedMessage<'_>) -> InboundMessage {
    let mut headers = MessageHeaders::new();
    if let Some(raw) = message.headers() {
        for header in raw.iter() {
            if let Some(value) = header.value {
                headers.insert(header.key, String::from_utf8_lossy(value).into_owned());
            }
        }
    }

    InboundMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        headers,
    }
}

#[async_trait]
impl MessageSource for KafkaMessageSource {
    fn subscribe(&self, topics: &[&str]) -> Result<(), SourceError> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| SourceError::Subscribe(e.to_string()))
    }

    async fn recv(&self) -> Result<InboundMessage, SourceError> {
        self.consumer
            .recv()
            .await
            .map(|message| to_inbound(&message))
            .map_err(|e| SourceError::Receive(e.to_string()))
    }

    fn commit(&self, message: &InboundMessage) -> Result<(), SourceError> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(&message.topic, message.partition, Offset::Offset(message.offset + 1))
            .map_err(|e| SourceError::Commit(e.to_string()))?;

        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| SourceError::Commit(e.to_string()))
    }

    fn rewind(&self, message: &InboundMessage) -> Result<(), SourceError> {
        self.consumer
            .seek(
                &message.topic,
                message.partition,
                Offset::Offset(message.offset),
                Timeout::After(SEEK_TIMEOUT),
            )
            .map_err(|e| SourceError::Seek(e.to_string()))
    }
}

#[async_trait]
impl ConnectivityProbe for KafkaMessageSource {
    fn name(&self) -> &str {
        "consumer"
    }

    async fn check(&self) -> Result<(), String> {
        let consumer = self.consumer.clone();
        let timeout = self.probe_timeout;

        tokio::task::spawn_blocking(move || {
            consumer
                .fetch_metadata(None, Timeout::After(timeout))
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| e.to_string())?
    }
}
