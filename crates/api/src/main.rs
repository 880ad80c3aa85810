use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, Method, StatusCode};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nichepress_api::config::ServerConfig;
use nichepress_api::notifications::EventForwarder;
use nichepress_api::{routes, state, ws};
use nichepress_core::store::ProjectStore;
use nichepress_db::{MemoryStore, PgProjectStore};
use nichepress_events::EventBus;
use nichepress_pipeline::{ExecutorRegistry, PipelineConfig, PipelineManager, RecoverySweeper};

use state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nichepress_api=debug,nichepress_pipeline=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Project State Store ---
    let store: Arc<dyn ProjectStore> = match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            let pool = nichepress_db::create_pool(&database_url)
                .await
                .expect("Failed to connect to database");
            nichepress_db::health_check(&pool)
                .await
                .expect("Database health check failed");
            nichepress_db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("Using PostgreSQL project store");
            Arc::new(PgProjectStore::new(pool))
        }
        Err(_) => {
            tracing::warn!(
                "DATABASE_URL not set; using in-memory project store (state is lost on restart)"
            );
            Arc::new(MemoryStore::new())
        }
    };

    // --- CORS ---
    let cors = build_cors_layer(&config);

    // --- WebSocket manager ---
    let ws_manager = Arc::new(ws::WsManager::new());

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());

    // Spawn the event forwarder (mirrors pipeline events to WebSocket clients).
    let forwarder = EventForwarder::new(Arc::clone(&ws_manager));
    let forwarder_handle = tokio::spawn(forwarder.run(event_bus.subscribe()));

    // --- Pipeline controller ---
    // Simulated executors drive the pipeline in development mode; deployments
    // register the real LLM / SEO / WordPress executors here instead.
    let registry = Arc::new(ExecutorRegistry::simulated());
    let manager = Arc::new(
        PipelineManager::new(
            Arc::clone(&store),
            registry,
            Arc::clone(&event_bus),
            PipelineConfig::from_env(),
        )
        .expect("Executor registry must cover every pipeline stage"),
    );
    tracing::info!("Pipeline manager started");

    // Spawn the recovery sweeper (re-drives projects orphaned by a restart).
    let sweeper_cancel = tokio_util::sync::CancellationToken::new();
    let sweeper = RecoverySweeper::new(Arc::clone(&manager));
    let sweeper_cancel_clone = sweeper_cancel.clone();
    let sweeper_handle = tokio::spawn(async move {
        sweeper.run(sweeper_cancel_clone).await;
    });

    // --- App state ---
    let state = AppState {
        store,
        manager: Arc::clone(&manager),
        config: Arc::new(config.clone()),
        ws_manager: Arc::clone(&ws_manager),
        event_bus: Arc::clone(&event_bus),
    };

    // --- Request ID header name ---
    let request_id_header = HeaderName::from_static("x-request-id");

    // --- Router ---
    let app = Router::new()
        // Health check at root level (not under /api/v1).
        .merge(routes::health::router())
        // API v1 routes.
        .nest("/api/v1", routes::api_routes())
        // -- Middleware stack (applied bottom-up) --
        // Panic recovery: catch panics and return 500 JSON.
        .layer(CatchPanicLayer::new())
        // Request timeout.
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        // Propagate request ID to response.
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        // Structured request/response tracing.
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // Set request ID on incoming requests.
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        // CORS.
        .layer(cors)
        // Shared state.
        .with_state(state);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_secs);

    // Stop the recovery sweeper first so it cannot re-drive projects while
    // we abort their drivers.
    sweeper_cancel.cancel();
    let _ = tokio::time::timeout(shutdown_timeout, sweeper_handle).await;
    tracing::info!("Recovery sweeper stopped");

    // Abort in-flight drivers without cancelling their projects; they stay
    // in_progress and are re-driven on next startup.
    manager.shutdown().await;

    // The pipeline manager still holds a bus handle, so the broadcast
    // channel never closes on its own; stop the forwarder directly.
    forwarder_handle.abort();
    tracing::info!("Event forwarder stopped");

    let ws_count = ws_manager.connection_count().await;
    if ws_count > 0 {
        tracing::info!(ws_count, "Closing remaining WebSocket connections");
    }
    ws_manager.shutdown_all().await;

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Build the CORS middleware layer from server configuration.
///
/// Panics at startup if any configured origin is invalid, which is the
/// desired behaviour -- we want misconfiguration to fail fast.
fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<_> = config
        .cors_origins
        .iter()
        .map(|o| {
            o.parse()
                .unwrap_or_else(|e| panic!("Invalid CORS origin '{o}': {e}"))
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}
