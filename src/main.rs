use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use order_pipeline::config::AppConfig;
use order_pipeline::consumer::{
    BrokerReachability, ConnectivityGate, ConnectivityProbe, ConsumerDispatcher,
    DeadLetterForwarder, KafkaMessageSource, MessagePipeline, StoreReachability,
};
use order_pipeline::domain::delivery::DeliveryCommitmentHandler;
use order_pipeline::domain::order::{
    ApproveOrder, CreateOrder, OrderCommandHandler, OrderLineInput, OrderServiceError, TraceContext,
};
use order_pipeline::messaging::{RedpandaClient, ResilientPublisher};
use order_pipeline::metrics::{self, Metrics};
use order_pipeline::store::PostgresStore;
use order_pipeline::utils::CircuitBreaker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_pipeline=debug")),
        )
        .init();

    let config = AppConfig::from_env()?;

    tracing::info!("🚀 Starting order pipeline");

    // === 1. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let system = actix_web::rt::System::new();
        if let Err(e) = system.block_on(metrics::start_metrics_server(metrics_registry, metrics_port)) {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    // === 2. Postgres ===
    tracing::info!("Connecting to Postgres...");
    let store = Arc::new(
        PostgresStore::connect(&config.database_url, config.database_max_connections).await?,
    );
    sqlx::migrate!("./migrations").run(store.pool()).await?;
    tracing::info!("✅ Migrations applied");

    // === 3. Broker publisher (retry + circuit breaker) ===
    let redpanda = Arc::new(RedpandaClient::new(&config.kafka_brokers, config.publish_send_timeout)?);
    let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone()));
    let publisher = Arc::new(
        ResilientPublisher::new(redpanda.clone(), breaker, config.publish_retry.clone())
            .with_metrics(metrics.clone()),
    );

    let orders = OrderCommandHandler::new(
        store.clone(),
        store.clone(),
        store.clone(),
        publisher.clone(),
        config.order_topics(),
        config.publish_timeout,
    )
    .with_metrics(metrics.clone());

    // === 4. Delivery commitment worker ===
    let source = Arc::new(KafkaMessageSource::new(
        &config.kafka_brokers,
        &config.consumer_group,
        config.connectivity_probe_timeout,
    )?);
    let gate = ConnectivityGate::new(
        vec![
            Arc::new(StoreReachability::new(store.clone())) as Arc<dyn ConnectivityProbe>,
            Arc::new(BrokerReachability::new(redpanda.clone(), config.connectivity_probe_timeout))
                as Arc<dyn ConnectivityProbe>,
            source.clone() as Arc<dyn ConnectivityProbe>,
        ],
        config.connectivity_check_interval,
        config.connectivity_probe_timeout,
    );
    let commitments = Arc::new(
        DeliveryCommitmentHandler::new(store.clone(), store.clone(), config.delivery_policy)
            .with_metrics(metrics.clone()),
    );
    let dlq = DeadLetterForwarder::new(publisher.clone(), config.topic_order_created_dlq.clone())
        .with_metrics(metrics.clone());
    let pipeline = MessagePipeline::new(commitments, source.clone(), dlq, config.handler_retry.clone())
        .with_metrics(metrics.clone());
    let dispatcher = ConsumerDispatcher::new(source, gate, pipeline, config.dispatcher());

    let shutdown = CancellationToken::new();
    let worker = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { dispatcher.run(shutdown).await }
    });

    // === 5. Demo lifecycle ===
    if config.run_demo {
        if let Err(e) = run_demo(&orders).await {
            tracing::error!(error = %e, "Demo failed");
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("🛑 Shutdown requested");
    shutdown.cancel();

    match worker.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Consumer worker failed"),
        Err(e) => tracing::error!(error = %e, "Consumer worker panicked"),
    }

    tracing::info!("👋 Stopped");
    Ok(())
}

/// Create an order above the approval threshold, approve it, then approve it
/// again to show the state guard.
async fn run_demo(orders: &OrderCommandHandler) -> anyhow::Result<()> {
    tracing::info!("📝 Demonstrating order lifecycle");

    let created = orders
        .create_order(CreateOrder {
            customer_id: 1,
            payment_condition_id: 1,
            order_date: None,
            items: vec![OrderLineInput::new("A", 26, rust_decimal::Decimal::new(20000, 2))],
            trace: TraceContext::new(uuid::Uuid::new_v4().to_string()),
        })
        .await;

    let order = match created {
        Ok(order) => order,
        Err(OrderServiceError::DuplicateOrder(existing_id)) => {
            tracing::info!(order_id = existing_id, "Demo order already submitted today, reusing it");
            orders.get_order(existing_id).await?
        }
        Err(e) => return Err(e.into()),
    };
    let order_id = order
        .id()
        .ok_or_else(|| anyhow::anyhow!("demo order was returned without an id"))?;

    tracing::info!(
        order_id = order_id,
        total_amount = %order.total_amount(),
        status = %order.status(),
        requires_manual_approval = order.requires_manual_approval(),
        "Demo order ready"
    );

    // Give the consumer a moment to pick up order-created
    tokio::time::sleep(Duration::from_secs(2)).await;

    for attempt in 1..=2 {
        let approval = orders
            .approve_order(ApproveOrder {
                order_id,
                approved_by: "demo-supervisor".to_string(),
                trace: TraceContext::new(uuid::Uuid::new_v4().to_string()),
            })
            .await;

        match approval {
            Ok(order) => tracing::info!(
                order_id = order_id,
                attempt = attempt,
                status = %order.status(),
                approved_at = ?order.approved_at(),
                "Demo approval accepted"
            ),
            Err(e) => tracing::info!(
                order_id = order_id,
                attempt = attempt,
                error = %e,
                "Demo approval refused"
            ),
        }
    }

    tracing::info!("🎉 Demo complete, press Ctrl-C to stop");
    Ok(())
}
