use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::messaging::MessageTransport;
use crate::store::StoreProbe;

// ============================================================================
// Connectivity Gate
// ============================================================================
//
// Coarse, process-level breaker in front of a consumer loop: do not subscribe
// while a dependency is down. Every probe is bounded by `probe_timeout` so a
// hung dependency reads as unreachable instead of blocking the check.
//
// ============================================================================

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self) -> Result<(), String>;
}

pub struct StoreReachability {
    store: Arc<dyn StoreProbe>,
}

impl StoreReachability {
    pub fn new(store: Arc<dyn StoreProbe>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ConnectivityProbe for StoreReachability {
    fn name(&self) -> &str {
        "store"
    }

    async fn check(&self) -> Result<(), String> {
        self.store.ping().await.map_err(|e| e.to_string())
    }
}

pub struct BrokerReachability {
    transport: Arc<dyn MessageTransport>,
    timeout: Duration,
}

impl BrokerReachability {
    pub fn new(transport: Arc<dyn MessageTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }
}

#[async_trait]
impl ConnectivityProbe for BrokerReachability {
    fn name(&self) -> &str {
        "broker"
    }

    async fn check(&self) -> Result<(), String> {
        self.transport
            .probe(self.timeout)
            .await
            .map_err(|e| e.to_string())
    }
}

pub struct ConnectivityGate {
    probes: Vec<Arc<dyn ConnectivityProbe>>,
    interval: Duration,
    probe_timeout: Duration,
}

impl ConnectivityGate {
    pub fn new(probes: Vec<Arc<dyn ConnectivityProbe>>, interval: Duration, probe_timeout: Duration) -> Self {
        Self {
            probes,
            interval,
            probe_timeout,
        }
    }

    /// Names and errors of every unreachable dependency
    pub async fn check_all(&self) -> Vec<(String, String)> {
        let mut failures = Vec::new();

        for probe in &self.probes {
            let result = match tokio::time::timeout(self.probe_timeout, probe.check()).await {
                Ok(result) => result,
                Err(_) => Err(format!("no answer within {:?}", self.probe_timeout)),
            };
            if let Err(e) = result {
                failures.push((probe.name().to_string(), e));
            }
        }

        failures
    }

    /// Block until every probe passes. Returns `false` if shutdown came first.
    pub async fn wait_until_ready(&self, shutdown: &CancellationToken) -> bool {
        loop {
            if shutdown.is_cancelled() {
                return false;
            }

            let failures = self.check_all().await;
            if failures.is_empty() {
                tracing::info!("🔌 Dependencies reachable");
                return true;
            }

            for (name, error) in &failures {
                tracing::warn!(
                    dependency = %name,
                    error = %error,
                    retry_in_secs = self.interval.as_secs_f64(),
                    "Dependency unreachable, holding consumer"
                );
            }

            tokio::select! {
                _ = shutdown.cancelled() => return false,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` checks
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ConnectivityProbe for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn check(&self) -> Result<(), String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err("connection refused".into())
            } else {
                Ok(())
            }
        }
    }

    struct Hung;

    #[async_trait]
    impl ConnectivityProbe for Hung {
        fn name(&self) -> &str {
            "hung"
        }

        async fn check(&self) -> Result<(), String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_waits_until_probe_recovers() {
        let flaky = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let gate = ConnectivityGate::new(
            vec![flaky.clone() as Arc<dyn ConnectivityProbe>],
            Duration::from_millis(5),
            Duration::from_secs(1),
        );

        assert!(gate.wait_until_ready(&CancellationToken::new()).await);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_hung_probe_counts_as_unreachable() {
        let gate = ConnectivityGate::new(
            vec![Arc::new(Hung) as Arc<dyn ConnectivityProbe>],
            Duration::from_millis(5),
            Duration::from_millis(10),
        );

        let failures = gate.check_all().await;

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "hung");
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_wait() {
        let gate = ConnectivityGate::new(
            vec![Arc::new(Flaky {
                failures: u32::MAX,
                calls: AtomicU32::new(0),
            }) as Arc<dyn ConnectivityProbe>],
            Duration::from_secs(3600),
            Duration::from_secs(1),
        );
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        assert!(!gate.wait_until_ready(&shutdown).await);
    }

    #[tokio::test]
    async fn test_store_probe_adapter() {
        let store = Arc::new(crate::store::InMemoryStore::new());
        let probe = StoreReachability::new(store.clone());

        assert!(probe.check().await.is_ok());
        store.set_unavailable(true);
        assert!(probe.check().await.is_err());
    }
}
