use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use patchguard::config::Config;
use patchguard::engine::Engine;
use patchguard::server::routes::build_router;
use patchguard::server::AppState;

#[tokio::main]
async fn main() {
    // Load .env
    let _ = dotenvy::dotenv();

    // Load config first (needed for logging setup)
    let config = Config::load(None).expect("failed to load config");

    // Initialize tracing from LoggingConfig
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "patchguard starting");
    patchguard::metrics::init();

    // Backbone, profile storage and heatmap renderer
    let engine = Arc::new(Engine::from_config(&config).expect("failed to initialize engine"));

    match engine.list_profiles().await {
        Ok(objects) => tracing::info!(count = objects.len(), "found trained profiles"),
        Err(e) => tracing::warn!(error = %e, "failed to list profiles on startup"),
    }

    let state = AppState {
        engine,
        config: Arc::new(config.clone()),
    };

    let app = build_router(state);

    // Bind and serve
    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(addr = %addr, "listening");

    let listener = TcpListener::bind(&addr)
        .await
        .expect("failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("patchguard stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
