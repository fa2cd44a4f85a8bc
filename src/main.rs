use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shop_orders::messaging::{LogNotifier, RedpandaClient, RedpandaNotifier, StatusNotifier};
use shop_orders::metrics::{self, Metrics};
use shop_orders::store::{PgStore, RedisKvStore};
use shop_orders::{AppConfig, Backends, Services};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,shop_orders=debug")),
        )
        .init();

    tracing::info!("🚀 Starting shop order service");

    let config = AppConfig::from_env()?;

    // === 1. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    // The metrics server gets its own runtime, as actix-web expects.
    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                tracing::error!(error = %e, "Failed to start metrics runtime");
                return;
            }
        };
        rt.block_on(async {
            if let Err(e) = metrics::start_metrics_server(metrics_registry, metrics_port).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    });

    // === 2. Stores ===
    let kv = Arc::new(RedisKvStore::connect(&config.redis_url).await?);

    tracing::info!("Connecting to Postgres...");
    let pg = Arc::new(PgStore::connect(&config.database_url, 20).await?);
    pg.migrate().await?;

    // === 3. Notifications ===
    let notifier: Arc<dyn StatusNotifier> = match &config.kafka_brokers {
        Some(brokers) => {
            let client = RedpandaClient::new(brokers, metrics.clone())
                .context("Failed to set up order notifications")?;
            tracing::info!(brokers = %brokers, "Order notifications go to Redpanda");
            Arc::new(RedpandaNotifier::new(client, metrics.clone()))
        }
        None => {
            tracing::info!("KAFKA_BROKERS not set, order notifications are logged only");
            Arc::new(LogNotifier)
        }
    };

    // === 4. Services ===
    let services = Services::build(
        Backends {
            kv,
            stock: pg.clone(),
            orders: pg.clone(),
            coupons: pg,
            notifier,
        },
        config.service_config(),
        metrics,
    );

    // === 5. Timeout sweeper ===
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = services.sweeper.clone().spawn(shutdown_rx);

    tracing::info!("✅ Order service ready");

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "Timeout sweeper task failed");
    }

    tracing::info!("🎉 Shutdown complete");
    Ok(())
}
