pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{
    call_with_policy, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitOpen,
    CircuitPolicy, CircuitState,
};
pub use retry::{
    retry_on_transient, retry_on_transient_until, IsTransient, RetryConfig,
    RetryResult,
};
