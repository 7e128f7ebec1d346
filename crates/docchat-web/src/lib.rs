pub mod config;
pub mod error;
pub mod frontend;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod session;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::{
    config::Config,
    handlers::stream,
    middleware::logging,
    routes::{health, messages, sidebar},
    state::AppState,
};

pub fn build_router(state: Arc<AppState>) -> Router {
    // Session-scoped API: every route sees the caller's Session extension
    let api_routes = Router::new()
        .route("/session", get(sidebar::get_session))
        .route("/threads", post(sidebar::new_chat))
        .route("/threads/:thread_id/activate", post(sidebar::activate_thread))
        .route(
            "/documents",
            post(sidebar::upload_document)
                .layer(DefaultBodyLimit::max(state.config.ui.max_upload_bytes())),
        )
        .route(
            "/messages",
            get(messages::list_messages).post(stream::send_message_stream),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            Arc::clone(&state),
            session::attach_session,
        ));

    Router::new()
        .route("/", get(frontend::index))
        .route("/health", get(health::health_check))
        .nest("/api", api_routes)
        .layer(axum_middleware::from_fn(logging::log_request))
        .layer(TimeoutLayer::new(state.config.server.request_timeout()))
        .layer(CompressionLayer::new())
        .layer(build_cors_layer(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn build_cors_layer(config: &Config) -> CorsLayer {
    if !config.cors.enabled {
        // Same-origin page; no cross-origin access
        return CorsLayer::new();
    }

    let cors = CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers(Any);

    if config.cors.origins.iter().any(|o| o == "*") {
        cors.allow_origin(Any)
    } else {
        let parsed_origins: Vec<axum::http::HeaderValue> = config
            .cors
            .origins
            .iter()
            .filter_map(|o| o.parse::<axum::http::HeaderValue>().ok())
            .collect();

        cors.allow_origin(parsed_origins)
    }
}
