use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::consumer::DispatcherConfig;
use crate::domain::delivery::{DeliveryPolicy, DEFAULT_DELIVERY_DAYS};
use crate::domain::order::OrderTopics;
use crate::utils::{CircuitBreakerConfig, RetryConfig};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Application configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub kafka_brokers: String,
    pub consumer_group: String,
    pub topic_order_created: String,
    pub topic_order_approved: String,
    pub topic_order_created_dlq: String,
    pub publish_retry: RetryConfig,
    /// Broker delivery timeout for a single send attempt
    pub publish_send_timeout: Duration,
    /// Bound on the whole background publication, all attempts included
    pub publish_timeout: Duration,
    pub circuit_breaker: CircuitBreakerConfig,
    pub handler_retry: RetryConfig,
    pub connectivity_check_interval: Duration,
    pub connectivity_probe_timeout: Duration,
    pub receive_error_backoff: Duration,
    pub delivery_policy: DeliveryPolicy,
    pub metrics_port: u16,
    pub run_demo: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as `from_env`, reading values through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let database_url = vars
            .get("DATABASE_URL")
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let publish_retry = RetryConfig {
            max_attempts: vars.parse("PUBLISH_MAX_ATTEMPTS", 3)?,
            initial_delay: Duration::from_millis(vars.parse("PUBLISH_INITIAL_BACKOFF_MS", 200)?),
            ..RetryConfig::default()
        };
        let publish_send_timeout = Duration::from_millis(vars.parse("PUBLISH_SEND_TIMEOUT_MS", 1000)?);
        let publish_timeout = Duration::from_millis(vars.parse("PUBLISH_TIMEOUT_MS", 5000)?);

        // Every attempt has to finish inside the publication bound, otherwise
        // the timeout aborts the retry loop before failures reach the breaker
        let worst_case = publish_send_timeout
            .saturating_mul(publish_retry.max_attempts.max(1))
            .saturating_add(publish_retry.max_total_delay());
        if worst_case >= publish_timeout {
            return Err(ConfigError::Invalid {
                name: "PUBLISH_TIMEOUT_MS",
                value: publish_timeout.as_millis().to_string(),
                reason: format!(
                    "must exceed {} attempts x PUBLISH_SEND_TIMEOUT_MS plus backoff ({} ms)",
                    publish_retry.max_attempts,
                    worst_case.as_millis()
                ),
            });
        }

        let failure_ratio: f64 = vars.parse("CIRCUIT_FAILURE_RATIO", 0.5)?;
        if !(failure_ratio > 0.0 && failure_ratio <= 1.0) {
            return Err(ConfigError::Invalid {
                name: "CIRCUIT_FAILURE_RATIO",
                value: failure_ratio.to_string(),
                reason: "must be in (0, 1]".to_string(),
            });
        }
        let circuit_breaker = CircuitBreakerConfig {
            failure_ratio,
            sampling_window: Duration::from_secs(vars.parse("CIRCUIT_SAMPLING_WINDOW_SECS", 30)?),
            minimum_throughput: vars.parse("CIRCUIT_MINIMUM_THROUGHPUT", 5)?,
            break_duration: Duration::from_secs(vars.parse("CIRCUIT_BREAK_DURATION_SECS", 30)?),
        };

        let handler_retry = RetryConfig {
            max_attempts: vars.parse("HANDLER_MAX_ATTEMPTS", 3)?,
            initial_delay: Duration::from_millis(vars.parse("HANDLER_INITIAL_BACKOFF_MS", 500)?),
            ..RetryConfig::default()
        };

        let delivery_days: i32 = vars.parse("DELIVERY_DAYS", DEFAULT_DELIVERY_DAYS)?;
        if delivery_days < 0 {
            return Err(ConfigError::Invalid {
                name: "DELIVERY_DAYS",
                value: delivery_days.to_string(),
                reason: "must not be negative".to_string(),
            });
        }

        Ok(AppConfig {
            database_url,
            database_max_connections: vars.parse("DATABASE_MAX_CONNECTIONS", 10)?,
            kafka_brokers: vars.get_or("KAFKA_BROKERS", "127.0.0.1:9092"),
            consumer_group: vars.get_or("CONSUMER_GROUP", "delivery-commitment-worker"),
            topic_order_created: vars.get_or("TOPIC_ORDER_CREATED", "order-created"),
            topic_order_approved: vars.get_or("TOPIC_ORDER_APPROVED", "order-approved"),
            topic_order_created_dlq: vars.get_or("TOPIC_ORDER_CREATED_DLQ", "order-created-dlq"),
            publish_retry,
            publish_send_timeout,
            publish_timeout,
            circuit_breaker,
            handler_retry,
            connectivity_check_interval: Duration::from_secs(
                vars.parse("CONNECTIVITY_CHECK_INTERVAL_SECS", 10)?,
            ),
            connectivity_probe_timeout: Duration::from_secs(
                vars.parse("CONNECTIVITY_PROBE_TIMEOUT_SECS", 3)?,
            ),
            receive_error_backoff: Duration::from_secs(vars.parse("RECEIVE_ERROR_BACKOFF_SECS", 2)?),
            delivery_policy: DeliveryPolicy::new(delivery_days),
            metrics_port: vars.parse("METRICS_PORT", 9090)?,
            run_demo: vars.parse("RUN_DEMO", false)?,
        })
    }

    pub fn order_topics(&self) -> OrderTopics {
        OrderTopics {
            order_created: self.topic_order_created.clone(),
            order_approved: self.topic_order_approved.clone(),
        }
    }

    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            topic: self.topic_order_created.clone(),
            receive_error_backoff: self.receive_error_backoff,
        }
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn get_or(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: e.to_string(),
                value,
            }),
        }
    }
}
