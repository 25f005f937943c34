//! Linewise background worker
//!
//! Keeps stored ticket ETAs fresh and watches queue health on cron schedules.

mod config;
mod jobs;
mod notifier;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use linewise_engine::{Clock, Engine, PgStore, SystemClock};
use linewise_shared::db;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::WorkerConfig;
use crate::notifier::AlertNotifier;

const CONNECT_RETRIES: usize = 5;
const CONNECT_MAX_DELAY: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env().context("invalid worker configuration")?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(config.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!config.log_json).then(|| tracing_subscriber::fmt::layer()))
        .init();

    tracing::info!("Linewise worker v{}", env!("CARGO_PKG_VERSION"));

    if config.run_migrations {
        let migration_pool = db::create_migration_pool(&config.database_url).await?;
        db::run_migrations(&migration_pool)
            .await
            .context("failed to run migrations")?;
        migration_pool.close().await;
        tracing::info!("Migrations applied");
    }

    let retry_strategy = ExponentialBackoff::from_millis(250)
        .max_delay(CONNECT_MAX_DELAY)
        .take(CONNECT_RETRIES)
        .map(jitter);

    let pool = Retry::spawn(retry_strategy, || async {
        db::create_pool(&config.database_url, config.database_max_connections)
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "Database not reachable, retrying"))
    })
    .await
    .context("failed to connect to database")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = Engine::new(Arc::new(PgStore::new(pool.clone())), Arc::clone(&clock), config.engine.clone());
    let notifier = AlertNotifier::new(config.alert_webhook_url.clone());
    if !notifier.is_configured() {
        tracing::info!("ALERT_WEBHOOK_URL not set, alerts will only be logged");
    }

    let mut scheduler = JobScheduler::new().await?;

    let eta_engine = engine.clone();
    scheduler
        .add(Job::new_async(config.eta_refresh_cron.as_str(), move |_id, _sched| {
            let engine = eta_engine.clone();
            Box::pin(async move {
                if let Err(e) = jobs::eta_refresh(&engine).await {
                    tracing::error!(error = %e, "ETA refresh failed");
                }
            })
        })?)
        .await?;

    let health_engine = engine.clone();
    let health_clock = Arc::clone(&clock);
    scheduler
        .add(Job::new_async(config.health_check_cron.as_str(), move |_id, _sched| {
            let engine = health_engine.clone();
            let notifier = notifier.clone();
            let clock = Arc::clone(&health_clock);
            Box::pin(async move {
                if let Err(e) = jobs::health_check(&engine, &notifier, &clock).await {
                    tracing::error!(error = %e, "Health check failed");
                }
            })
        })?)
        .await?;

    scheduler.start().await?;
    tracing::info!(
        eta_refresh = %config.eta_refresh_cron,
        health_check = %config.health_check_cron,
        "Worker started"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    scheduler.shutdown().await?;
    pool.close().await;

    tracing::info!("Worker stopped");
    Ok(())
}
