// Private module declaration
mod server;

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec,
    IntGauge, Opts, Registry,
};

use crate::utils::CircuitState;

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Event publication (attempts, final outcome per topic)
// - Circuit breaker state transitions
// - Consumer message outcomes and handling latency
// - Dead Letter Queue statistics
// - Order deduplication and delivery commitments
//
// The registry is owned (not the process-global default) so tests can build
// isolated instances. Scraped via /metrics.
// ============================================================================

/// Central metrics registry for the entire application
pub struct Metrics {
    registry: Registry,

    // Publication Metrics
    pub publish_attempts_total: IntCounterVec,
    pub publish_outcomes_total: IntCounterVec,

    // Circuit Breaker Metrics
    pub circuit_breaker_state: IntGauge,
    pub circuit_breaker_transitions: IntCounterVec,

    // Consumer Metrics
    pub consumer_messages_total: IntCounterVec,
    pub consumer_handling_duration: HistogramVec,

    // DLQ Metrics
    pub dlq_messages_total: IntCounter,
    pub dlq_messages_by_reason: IntCounterVec,

    // Domain Metrics
    pub duplicate_orders_total: IntCounterVec,
    pub delivery_commitments_created: IntCounter,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Publication Metrics
        let publish_attempts_total = IntCounterVec::new(
            Opts::new("publish_attempts_total", "Broker send attempts, including retries"),
            &["topic"],
        )?;
        registry.register(Box::new(publish_attempts_total.clone()))?;

        let publish_outcomes_total = IntCounterVec::new(
            Opts::new("publish_outcomes_total", "Final outcome of each publication"),
            &["topic", "outcome"],
        )?;
        registry.register(Box::new(publish_outcomes_total.clone()))?;

        // Circuit Breaker Metrics
        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let circuit_breaker_transitions = IntCounterVec::new(
            Opts::new("circuit_breaker_transitions_total", "Circuit breaker state transitions"),
            &["from_state", "to_state"],
        )?;
        registry.register(Box::new(circuit_breaker_transitions.clone()))?;

        // Consumer Metrics
        let consumer_messages_total = IntCounterVec::new(
            Opts::new("consumer_messages_total", "Consumed messages by final outcome"),
            &["topic", "outcome"],
        )?;
        registry.register(Box::new(consumer_messages_total.clone()))?;

        let consumer_handling_duration = HistogramVec::new(
            HistogramOpts::new("consumer_handling_duration_seconds", "Per-message handling duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["handler"],
        )?;
        registry.register(Box::new(consumer_handling_duration.clone()))?;

        // DLQ Metrics
        let dlq_messages_total = IntCounter::new(
            "dlq_messages_total",
            "Total messages forwarded to the dead letter topic",
        )?;
        registry.register(Box::new(dlq_messages_total.clone()))?;

        let dlq_messages_by_reason = IntCounterVec::new(
            Opts::new("dlq_messages_by_reason", "DLQ messages by failure reason"),
            &["reason"],
        )?;
        registry.register(Box::new(dlq_messages_by_reason.clone()))?;

        // Domain Metrics
        let duplicate_orders_total = IntCounterVec::new(
            Opts::new("duplicate_orders_total", "Order submissions rejected as duplicates"),
            &["detected_by"],
        )?;
        registry.register(Box::new(duplicate_orders_total.clone()))?;

        let delivery_commitments_created = IntCounter::new(
            "delivery_commitments_created_total",
            "Delivery commitments persisted",
        )?;
        registry.register(Box::new(delivery_commitments_created.clone()))?;

        Ok(Self {
            registry,
            publish_attempts_total,
            publish_outcomes_total,
            circuit_breaker_state,
            circuit_breaker_transitions,
            consumer_messages_total,
            consumer_handling_duration,
            dlq_messages_total,
            dlq_messages_by_reason,
            duplicate_orders_total,
            delivery_commitments_created,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_publish_attempt(&self, topic: &str) {
        self.publish_attempts_total.with_label_values(&[topic]).inc();
    }

    pub fn record_publish_outcome(&self, topic: &str, outcome: &str) {
        self.publish_outcomes_total.with_label_values(&[topic, outcome]).inc();
    }

    /// Helper to update circuit breaker state
    pub fn update_circuit_breaker_state(&self, state: CircuitState) {
        self.circuit_breaker_state.set(state.as_gauge());
    }

    /// Helper to record circuit breaker transition
    pub fn record_circuit_transition(&self, from: CircuitState, to: CircuitState) {
        self.circuit_breaker_transitions
            .with_label_values(&[from.as_str(), to.as_str()])
            .inc();
        self.update_circuit_breaker_state(to);
    }

    /// Helper to record a consumed message and how long it took
    pub fn record_consumed(&self, topic: &str, handler: &str, outcome: &str, duration_secs: f64) {
        self.consumer_messages_total.with_label_values(&[topic, outcome]).inc();
        self.consumer_handling_duration
            .with_label_values(&[handler])
            .observe(duration_secs);
    }

    /// Helper to record DLQ message
    pub fn record_dlq_message(&self, reason: &str) {
        self.dlq_messages_total.inc();
        self.dlq_messages_by_reason.with_label_values(&[reason]).inc();
    }

    pub fn record_duplicate_order(&self, detected_by: &str) {
        self.duplicate_orders_total.with_label_values(&[detected_by]).inc();
    }

    pub fn record_commitment_created(&self) {
        self.delivery_commitments_created.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        metrics.record_dlq_message("decode_failure");
        assert!(!metrics.registry().gather().is_empty());
    }

    #[test]
    fn test_circuit_transition_updates_gauge() {
        let metrics = Metrics::new().unwrap();

        metrics.record_circuit_transition(CircuitState::Closed, CircuitState::Open);

        assert_eq!(metrics.circuit_breaker_state.get(), 1);
        assert_eq!(
            metrics
                .circuit_breaker_transitions
                .with_label_values(&["closed", "open"])
                .get(),
            1
        );
    }

    #[test]
    fn test_dlq_counters() {
        let metrics = Metrics::new().unwrap();

        metrics.record_dlq_message("decode_failure");
        metrics.record_dlq_message("retries_exhausted");
        metrics.record_dlq_message("decode_failure");

        assert_eq!(metrics.dlq_messages_total.get(), 3);
        assert_eq!(
            metrics.dlq_messages_by_reason.with_label_values(&["decode_failure"]).get(),
            2
        );
    }

    #[test]
    fn test_separate_instances_do_not_share_state() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();

        a.record_commitment_created();

        assert_eq!(a.delivery_commitments_created.get(), 1);
        assert_eq!(b.delivery_commitments_created.get(), 0);
    }
}
