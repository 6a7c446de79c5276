//! Reminder scheduler process.
//!
//! Connects to `PostgreSQL` and Redpanda, applies migrations, then ticks until
//! SIGINT or SIGTERM.

use calendar_core::environment::SystemClock;
use calendar_core::repository::Storage;
use calendar_postgres::PostgresStorage;
use calendar_redpanda::RedpandaAlertQueue;
use calendar_scheduler::{Scheduler, Settings};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&settings.log_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        postgres = ?settings.postgres,
        brokers = %settings.redpanda_brokers,
        topic = %settings.alert_topic,
        period_secs = settings.scheduler.period.as_secs(),
        "Starting calendar scheduler"
    );

    let postgres = PostgresStorage::connect(&settings.postgres)
        .await
        .inspect_err(|e| error!(error = %e, "Database unreachable"))?;
    postgres.migrate().await?;
    let storage: Arc<dyn Storage> = Arc::new(postgres);

    let queue = Arc::new(
        RedpandaAlertQueue::builder()
            .brokers(&settings.redpanda_brokers)
            .topic(&settings.alert_topic)
            .timeout(settings.scheduler.publish_timeout)
            .build()?,
    );

    let scheduler = Scheduler::new(
        Arc::clone(&storage),
        queue,
        SystemClock,
        settings.scheduler.clone(),
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        shutdown_signal().await;
        if shutdown_tx.send(()).is_err() {
            warn!("Scheduler already gone");
        }
    });

    let outcome = scheduler.run(shutdown_rx).await;

    storage.close().await;
    info!("Storage closed");

    outcome?;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }
}
