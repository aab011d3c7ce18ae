use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use genforge_events::{AlertLog, ConnectionRegistry, EventBus, JobNotifier};
use genforge_pipeline::{EngineConfig, EngineContext, HttpFetcher, JobService, LocalFsStorage};
use genforge_providers::{build_adapter, ProviderAdapter};
use genforge_worker::config::ServerConfig;
use genforge_worker::router::build_app_router;
use genforge_worker::state::AppState;
use genforge_worker::ws;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    init_tracing(config.log_json);
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let engine_config = EngineConfig::from_env().expect("Invalid engine configuration");
    tracing::info!(
        providers = engine_config.providers.len(),
        stale_after_secs = engine_config.stale_after.as_secs(),
        "Loaded engine configuration",
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = genforge_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    genforge_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    genforge_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Event publishing ---
    let registry = Arc::new(ConnectionRegistry::new());
    let event_bus = Arc::new(EventBus::default());
    let alert_log = tokio::spawn(AlertLog::run(event_bus.subscribe()));
    let heartbeat_cancel = CancellationToken::new();
    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&registry), heartbeat_cancel.clone());

    // --- Engines ---
    let storage = Arc::new(LocalFsStorage::new(
        &config.asset_root,
        &config.asset_public_prefix,
    ));
    let fetcher = Arc::new(
        HttpFetcher::new(Duration::from_secs(config.download_timeout_secs))
            .expect("Failed to build asset download client"),
    );
    let ctx = EngineContext::postgres(
        pool.clone(),
        storage,
        fetcher,
        JobNotifier::new(Arc::clone(&registry), Arc::clone(&event_bus)),
    );

    let adapters: Vec<Arc<dyn ProviderAdapter>> = engine_config
        .providers
        .iter()
        .map(|p| {
            build_adapter(p.kind, p.settings.clone())
                .unwrap_or_else(|e| panic!("Failed to build {} adapter: {e}", p.kind))
        })
        .collect();
    let shutdown_grace = engine_config.shutdown_grace;
    let service = Arc::new(JobService::start(ctx, adapters, engine_config));

    // --- App state ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        service: Arc::clone(&service),
        registry: Arc::clone(&registry),
    };
    let app = build_app_router(state);

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

    service.shutdown(shutdown_grace).await;

    let ws_count = registry.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    registry.shutdown_all().await;

    heartbeat_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), heartbeat_handle).await;

    // Dropping the last publishers closes the bus and ends the alert log.
    drop(service);
    drop(event_bus);
    let _ = tokio::time::timeout(Duration::from_secs(5), alert_log).await;

    tracing::info!("Graceful shutdown complete");
}

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "genforge_worker=debug,genforge_pipeline=debug,tower_http=debug".into()
    });
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
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
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
