use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use docchat_web::{
    build_router,
    config::{BackendKind, Config},
    session,
    state::{build_backend, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    let config = Config::load()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    init_logging(&config);

    tracing::info!("Starting docchat web server");
    tracing::info!("Config loaded: {}:{}", config.server.host, config.server.port);

    match config.backend.kind {
        BackendKind::Http => {
            tracing::info!("Using backend at {}", config.backend.base_url);
        }
        BackendKind::Memory => {
            tracing::warn!("Using in-memory backend: replies are echoes, nothing is retrieved");
        }
    }
    let backend = build_backend(&config.backend)
        .map_err(|e| anyhow::anyhow!("Failed to create backend client: {}", e))?;

    let state = Arc::new(AppState::new(config.clone(), backend));
    tokio::spawn(session::sweep_idle_sessions(
        Arc::clone(&state.sessions),
        config.session.sweep_interval(),
    ));
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.logging.format.as_str() {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }
}
