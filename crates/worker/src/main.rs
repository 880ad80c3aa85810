//! Headless pipeline worker.
//!
//! Runs the recovery sweeper against the shared PostgreSQL store without
//! the HTTP surface, for deployments that separate intake (API) from
//! execution. The sweeper finds projects without a live driver and drives
//! them here.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nichepress_core::store::ProjectStore;
use nichepress_db::PgProjectStore;
use nichepress_events::EventBus;
use nichepress_pipeline::{ExecutorRegistry, PipelineConfig, PipelineManager, RecoverySweeper};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nichepress_worker=debug,nichepress_pipeline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // A standalone worker only makes sense against shared durable state.
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for the worker");

    let pool = nichepress_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    nichepress_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    nichepress_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database ready");

    let store: Arc<dyn ProjectStore> = Arc::new(PgProjectStore::new(pool));
    let event_bus = Arc::new(EventBus::default());

    // Simulated executors drive the pipeline in development mode; deployments
    // register the real LLM / SEO / WordPress executors here instead.
    let registry = Arc::new(ExecutorRegistry::simulated());
    let manager = Arc::new(
        PipelineManager::new(store, registry, event_bus, PipelineConfig::from_env())
            .expect("Executor registry must cover every pipeline stage"),
    );

    let cancel = tokio_util::sync::CancellationToken::new();
    let sweeper = RecoverySweeper::new(Arc::clone(&manager));
    let sweeper_cancel = cancel.clone();
    let sweeper_handle = tokio::spawn(async move {
        sweeper.run(sweeper_cancel).await;
    });

    tracing::info!("Worker started, sweeping for projects to drive");

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl-C handler");
    tracing::info!("Received SIGINT (Ctrl-C), shutting down");

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), sweeper_handle).await;

    // Interrupted projects stay in_progress; the next worker run resumes them.
    manager.shutdown().await;

    tracing::info!("Worker shutdown complete");
}
