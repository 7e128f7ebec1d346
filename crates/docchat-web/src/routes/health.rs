use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub services: HashMap<String, String>,
}

/// Health check endpoint
///
/// Returns the health status of the UI server and its backend
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let mut services = HashMap::new();

    // Listing threads is the lightest call the backend contract offers
    let backend_up = match state.backend.retrieve_all_threads().await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!("Backend health check failed: {}", e);
            false
        }
    };

    services.insert(
        "backend".to_string(),
        if backend_up { "connected" } else { "disconnected" }.to_string(),
    );
    services.insert(
        "sessions".to_string(),
        state.sessions.len().await.to_string(),
    );

    Json(HealthResponse {
        status: if backend_up { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        services,
    })
}
