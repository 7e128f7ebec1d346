use docchat_backend::{BackendError, ChatBackend, HttpBackend, MemoryBackend};
use std::sync::Arc;

use crate::config::{BackendConfig, BackendKind, Config};
use crate::error::{ApiError, ApiResult};
use crate::session::SessionStore;

/// Shared application state passed to all handlers
///
/// The backend client is created once at startup and shared by every session.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub backend: Arc<dyn ChatBackend>,
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn new(config: Config, backend: Arc<dyn ChatBackend>) -> Self {
        let sessions = Arc::new(SessionStore::new(config.session.idle_timeout()));
        Self {
            config: Arc::new(config),
            backend,
            sessions,
        }
    }
}

/// Backend client selected by `backend.kind`
pub fn build_backend(config: &BackendConfig) -> ApiResult<Arc<dyn ChatBackend>> {
    match config.kind {
        BackendKind::Http => {
            let backend = HttpBackend::with_timeout(&config.base_url, config.timeout())
                .map_err(|e| match e {
                    BackendError::InvalidUrl(url) => {
                        ApiError::Config(format!("invalid backend.base_url: {}", url))
                    }
                    other => ApiError::Backend(other),
                })?;
            Ok(Arc::new(backend))
        }
        BackendKind::Memory => Ok(Arc::new(MemoryBackend::new())),
    }
}
