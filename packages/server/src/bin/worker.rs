// Entry point for the report worker pool

use std::sync::Arc;

use anyhow::{Context, Result};
use reviewiq_core::domains::reports::{OutcomeDispatcher, ScrapeReportHandler};
use reviewiq_core::kernel::jobs::{JobRunner, JobStore, JobWorker, PostgresJobStore};
use reviewiq_core::kernel::{
    BaseNotifier, HtmlReportGenerator, HttpReviewScraper, LogNotifier, ResendNotifier,
};
use reviewiq_core::Config;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,reviewiq_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting ReviewIQ report worker");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(queue = ?config.queue, "Configuration loaded");

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections((config.queue.worker_count as u32 + 4).max(10))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    let store: Arc<dyn JobStore> =
        Arc::new(PostgresJobStore::new(pool, config.queue.store_settings()));

    let notifier: Arc<dyn BaseNotifier> = match &config.resend_api_key {
        Some(api_key) => Arc::new(ResendNotifier::new(
            api_key.clone(),
            config.email_from.clone(),
        )?),
        None => {
            tracing::warn!("RESEND_API_KEY not set, report emails will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let dispatcher = Arc::new(OutcomeDispatcher::new(
        store.clone(),
        Arc::new(HtmlReportGenerator::new(
            config.reports_path.clone(),
            config.base_url.clone(),
        )),
        notifier,
        config.dispatcher_config(),
    ));

    let handler = ScrapeReportHandler::new(
        Arc::new(HttpReviewScraper::new()?),
        dispatcher,
        config.max_reviews,
    );

    let worker_id = format!("worker-{}", std::process::id());
    let worker = JobWorker::new(store.clone(), config.queue.worker_config(worker_id))
        .with_handler(Arc::new(handler));

    let handle = JobRunner::new(store, worker, config.queue.runner_config()).start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested, waiting for in-flight jobs");
    handle.shutdown().await;

    Ok(())
}
