use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::connectivity::ConnectivityGate;
use super::pipeline::{MessageOutcome, MessagePipeline};
use super::source::{MessageSource, SourceError};
use super::EventHandler;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub topic: String,
    /// Pause after a receive error or a failed DLQ hand-off
    pub receive_error_backoff: Duration,
}

/// Owns one subscription and feeds its messages, one at a time, to the pipeline
pub struct ConsumerDispatcher<H: EventHandler> {
    source: Arc<dyn MessageSource>,
    gate: ConnectivityGate,
    pipeline: MessagePipeline<H>,
    config: DispatcherConfig,
}

impl<H: EventHandler> ConsumerDispatcher<H> {
    pub fn new(
        source: Arc<dyn MessageSource>,
        gate: ConnectivityGate,
        pipeline: MessagePipeline<H>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            source,
            gate,
            pipeline,
            config,
        }
    }

    /// Runs until `shutdown` is cancelled. A message already being handled
    /// is finished before the loop exits.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), SourceError> {
        if !self.gate.wait_until_ready(&shutdown).await {
            tracing::info!(topic = %self.config.topic, "Shutdown before consumer became ready");
            return Ok(());
        }

        self.source.subscribe(&[self.config.topic.as_str()])?;
        tracing::info!(topic = %self.config.topic, "📥 Consumer subscribed");

        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                received = self.source.recv() => received,
            };

            match received {
                Ok(message) => match self.pipeline.process(&message, &shutdown).await {
                    MessageOutcome::Redeliver => {
                        if let Err(e) = self.source.rewind(&message) {
                            tracing::error!(
                                offset = message.offset,
                                error = %e,
                                "Rewind failed, message redelivers after rebalance"
                            );
                        }
                        if !self.pause(&shutdown).await {
                            break;
                        }
                    }
                    MessageOutcome::Abandoned => break,
                    MessageOutcome::Processed | MessageOutcome::DeadLettered(_) => {}
                },
                Err(e) => {
                    tracing::warn!(
                        topic = %self.config.topic,
                        error = %e,
                        backoff_secs = self.config.receive_error_backoff.as_secs_f64(),
                        "Receive error, backing off"
                    );
                    if !self.pause(&shutdown).await {
                        break;
                    }
                }
            }
        }

        tracing::info!(topic = %self.config.topic, "Consumer stopped");
        Ok(())
    }

    /// `false` when shutdown interrupted the pause
    async fn pause(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(self.config.receive_error_backoff) => true,
        }
    }
}
