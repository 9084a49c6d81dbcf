use async_trait::async_trait;

use crate::messaging::MessageHeaders;

/// One record as received from the broker; the payload is kept verbatim
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub headers: MessageHeaders,
}

impl InboundMessage {
    pub fn key_str(&self) -> Option<&str> {
        self.key.as_deref().and_then(|k| std::str::from_utf8(k).ok())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Offset commit failed: {0}")]
    Commit(String),

    #[error("Seek failed: {0}")]
    Seek(String),
}

/// Manually committed message stream
#[async_trait]
pub trait MessageSource: Send + Sync {
    fn subscribe(&self, topics: &[&str]) -> Result<(), SourceError>;

    async fn recv(&self) -> Result<InboundMessage, SourceError>;

    /// Mark `message` as fully handled (next fetch starts after it)
    fn commit(&self, message: &InboundMessage) -> Result<(), SourceError>;

    /// Re-deliver `message` on the next `recv`
    fn rewind(&self, message: &InboundMessage) -> Result<(), SourceError>;
}
