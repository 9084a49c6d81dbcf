use std::collections::BTreeMap;

use crate::domain::order::TraceContext;

// ============================================================================
// Message Headers
// ============================================================================

pub const CORRELATION_ID: &str = "X-Correlation-ID";
pub const CAUSATION_ID: &str = "X-Causation-ID";
pub const DLQ_REASON: &str = "X-Dlq-Reason";
pub const ORIGINAL_TOPIC: &str = "X-Original-Topic";
pub const ORIGINAL_PARTITION: &str = "X-Original-Partition";
pub const ORIGINAL_OFFSET: &str = "X-Original-Offset";

/// String headers carried next to a payload. Lookup ignores ASCII case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHeaders {
    entries: BTreeMap<String, String>,
}

impl MessageHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(name)
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.get(CORRELATION_ID).filter(|v| !v.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<&TraceContext> for MessageHeaders {
    fn from(trace: &TraceContext) -> Self {
        let mut headers = MessageHeaders::new();
        if let Some(correlation_id) = &trace.correlation_id {
            headers.insert(CORRELATION_ID, correlation_id.clone());
        }
        if let Some(causation_id) = &trace.causation_id {
            headers.insert(CAUSATION_ID, causation_id.clone());
        }
        headers
    }
}
