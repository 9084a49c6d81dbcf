use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use async_trait::async_trait;
use tokio::sync::Mutex;

// ============================================================================
// Circuit Breaker Pattern Implementation
// ============================================================================
//
// Prevents cascading failures by tracking the failure ratio over a rolling
// sampling window and temporarily blocking calls when a dependency is
// unhealthy.
//
// States:
// - Closed: Normal operation, calls pass through and outcomes are sampled
// - Open: Failure ratio crossed the threshold, calls fail fast
// - HalfOpen: Break duration elapsed, a single probe call is let through
//
// A call whose future is dropped before it settles (timeout, task abort)
// counts as a failure. A half-open probe that never settles is replaced once
// it has been outstanding for a full break duration.
//
// The breaker is an owned value; share it with Arc across the callers that
// should trip together (e.g. every publish through one producer).
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,     // Normal operation
    Open,       // Blocking requests
    HalfOpen,   // Testing recovery
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    /// Gauge encoding used by metrics (0=Closed, 1=Open, 2=HalfOpen)
    pub fn as_gauge(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Failure ratio (0.0..=1.0) at or above which the circuit opens
    pub failure_ratio: f64,
    /// Length of the rolling window over which outcomes are sampled
    pub sampling_window: Duration,
    /// Minimum number of sampled calls before the ratio is evaluated
    pub minimum_throughput: u32,
    /// How long the circuit stays open before a probe is allowed
    pub break_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_ratio: 0.5,
            sampling_window: Duration::from_secs(30),
            minimum_throughput: 5,
            break_duration: Duration::from_secs(30),
        }
    }
}

/// Error returned when the circuit rejects a call without attempting it
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("Circuit breaker is open")]
pub struct CircuitOpen;

/// Pluggable breaking policy; `CircuitBreaker` is the default implementation
#[async_trait]
pub trait CircuitPolicy: Send + Sync {
    /// Ask permission for one call. `Err(CircuitOpen)` means fail fast.
    async fn try_acquire(&self) -> Result<(), CircuitOpen>;

    async fn record_success(&self);

    async fn record_failure(&self);

    /// The permitted call was dropped before it completed. Runs from `Drop`,
    /// so it must not block.
    fn record_abandoned(&self);

    async fn state(&self) -> CircuitState;
}

/// Settles an acquired permit as abandoned unless the call completed
struct Permit<'a> {
    policy: &'a dyn CircuitPolicy,
    settled: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.policy.record_abandoned();
        }
    }
}

/// Execute an operation under any circuit policy
pub async fn call_with_policy<F, T, E>(
    policy: &dyn CircuitPolicy,
    operation: F,
) -> Result<T, CircuitBreakerError<E>>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    policy
        .try_acquire()
        .await
        .map_err(|_| CircuitBreakerError::CircuitOpen)?;

    let mut permit = Permit {
        policy,
        settled: false,
    };
    let outcome = operation.await;
    permit.settled = true;

    match outcome {
        Ok(result) => {
            policy.record_success().await;
            Ok(result)
        }
        Err(err) => {
            policy.record_failure().await;
            Err(CircuitBreakerError::OperationFailed(err))
        }
    }
}

#[derive(Clone)]
pub struct CircuitBreaker {
    state: Arc<Mutex<CircuitBreakerState>>,
    config: CircuitBreakerConfig,
}

struct CircuitBreakerState {
    state: CircuitState,
    /// (timestamp, succeeded) for every call completed in the window
    samples: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    probe_started_at: Option<Instant>,
}

impl CircuitBreakerState {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some((at, _)) = self.samples.front() {
            if now.duration_since(*at) > window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn failure_count(&self) -> u32 {
        self.samples.iter().filter(|(_, ok)| !ok).count() as u32
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.samples.clear();
        self.opened_at = None;
        self.probe_in_flight = false;
        self.probe_started_at = None;
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.probe_in_flight = false;
        self.probe_started_at = None;
    }

    fn start_probe(&mut self, now: Instant) {
        self.state = CircuitState::HalfOpen;
        self.probe_in_flight = true;
        self.probe_started_at = Some(now);
    }

    fn fail(&mut self, now: Instant, config: &CircuitBreakerConfig) {
        match self.state {
            CircuitState::Closed => {
                self.samples.push_back((now, false));
                self.prune(now, config.sampling_window);

                let total = self.samples.len() as u32;
                let failures = self.failure_count();
                if total >= config.minimum_throughput {
                    let ratio = failures as f64 / total as f64;
                    if ratio >= config.failure_ratio {
                        tracing::warn!(
                            failures = failures,
                            sampled = total,
                            failure_ratio = ratio,
                            break_secs = config.break_duration.as_secs_f64(),
                            "Circuit breaker opening"
                        );
                        self.open(now);
                    }
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!("Failure during half-open probe, reopening circuit");
                self.open(now);
            }
            CircuitState::Open => {
                // Already open, calls are not being attempted
            }
        }
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(CircuitBreakerState {
                state: CircuitState::Closed,
                samples: VecDeque::new(),
                opened_at: None,
                probe_in_flight: false,
                probe_started_at: None,
            })),
            config,
        }
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        call_with_policy(self, operation).await
    }

    pub async fn get_state(&self) -> CircuitState {
        self.state.lock().await.state
    }

    /// Failures currently inside the sampling window
    pub async fn get_failure_count(&self) -> u32 {
        let mut state = self.state.lock().await;
        state.prune(Instant::now(), self.config.sampling_window);
        state.failure_count()
    }

    /// Manually reset the circuit breaker
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        tracing::info!("Circuit breaker manually reset");
        state.close();
    }
}

#[async_trait]
impl CircuitPolicy for CircuitBreaker {
    async fn try_acquire(&self) -> Result<(), CircuitOpen> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        match state.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = state
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.break_duration)
                    .unwrap_or(true);

                if elapsed {
                    tracing::info!("Circuit breaker transitioning to HalfOpen, allowing probe call");
                    state.start_probe(now);
                    Ok(())
                } else {
                    Err(CircuitOpen)
                }
            }
            CircuitState::HalfOpen => {
                let stale = state
                    .probe_started_at
                    .map(|at| now.duration_since(at) >= self.config.break_duration)
                    .unwrap_or(true);

                if !state.probe_in_flight {
                    state.start_probe(now);
                    Ok(())
                } else if stale {
                    tracing::warn!("Half-open probe never settled, allowing a new probe");
                    state.start_probe(now);
                    Ok(())
                } else {
                    Err(CircuitOpen)
                }
            }
        }
    }

    async fn record_success(&self) {
        let mut state = self.state.lock().await;

        match state.state {
            CircuitState::HalfOpen => {
                tracing::info!("Circuit breaker closing after successful probe");
                state.close();
            }
            CircuitState::Closed => {
                let now = Instant::now();
                state.samples.push_back((now, true));
                state.prune(now, self.config.sampling_window);
            }
            CircuitState::Open => {
                tracing::warn!("Success recorded while circuit is open");
            }
        }
    }

    async fn record_failure(&self) {
        let mut state = self.state.lock().await;
        state.fail(Instant::now(), &self.config);
    }

    fn record_abandoned(&self) {
        match self.state.try_lock() {
            Ok(mut state) => {
                tracing::warn!(state = state.state.as_str(), "Call dropped before completing, recording failure");
                state.fail(Instant::now(), &self.config);
            }
            // Contended; a stuck probe is still replaced after break_duration
            Err(_) => tracing::warn!("Call dropped before completing, breaker busy, outcome not recorded"),
        }
    }

    async fn state(&self) -> CircuitState {
        self.get_state().await
    }
}

#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    CircuitOpen,
    OperationFailed(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::CircuitOpen => write!(f, "Circuit breaker is open"),
            CircuitBreakerError::OperationFailed(e) => write!(f, "Operation failed: {}", e),
        }
    }
}

impl<E: std::error::Error> std::error::Error for CircuitBreakerError<E> {}
