use axum::{
    extract::{Multipart, Path, State},
    Extension, Json,
};
use docchat_backend::IngestSummary;
use serde::Serialize;
use std::sync::Arc;

use crate::{
    error::{ApiError, ApiResult},
    session::{Session, SessionView},
    state::AppState,
};

const UPLOAD_FIELD: &str = "file";
const PDF_MAGIC: &[u8] = b"%PDF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Indexed,
    AlreadyIndexed,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub status: UploadStatus,
    pub document: IngestSummary,
    pub session: SessionView,
}

/// Current session: active thread, history, past chats, latest document
pub async fn get_session(Extension(session): Extension<Session>) -> Json<SessionView> {
    Json(session.state.lock().await.view())
}

/// "New Chat": fresh thread id and empty history
pub async fn new_chat(Extension(session): Extension<Session>) -> Json<SessionView> {
    let mut state = session.state.lock().await;
    state.reset_chat();
    tracing::info!(session_id = %session.id, thread_id = %state.thread_id, "New chat");

    Json(state.view())
}

/// Switch to a past chat, loading its history from the backend
pub async fn activate_thread(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(thread_id): Path<String>,
) -> ApiResult<Json<SessionView>> {
    let thread_id = thread_id.trim().to_string();
    if thread_id.is_empty() {
        return Err(ApiError::BadRequest("thread id must not be empty".to_string()));
    }

    let messages = state.backend.get_state(&thread_id).await?.chat_history();
    tracing::info!(
        session_id = %session.id,
        thread_id = %thread_id,
        messages = messages.len(),
        "Thread loaded"
    );

    let mut session_state = session.state.lock().await;
    session_state.switch_thread(thread_id, messages);

    Ok(Json(session_state.view()))
}

/// Index an uploaded PDF for the active thread
///
/// A filename already ingested in this thread is not sent to the backend again.
pub async fn upload_document(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let (filename, bytes) = read_upload(&mut multipart).await?;

    if !is_pdf(&filename, &bytes) {
        return Err(ApiError::UnsupportedFile(filename));
    }

    // Held across ingestion so the presence check and the insert stay atomic
    let mut session_state = session.state.lock().await;
    let thread_id = session_state.thread_id.clone();

    if let Some(existing) = session_state
        .thread_docs()
        .and_then(|docs| docs.get(&filename))
        .cloned()
    {
        tracing::info!(thread_id = %thread_id, filename = %filename, "PDF already indexed");
        return Ok(Json(UploadResponse {
            status: UploadStatus::AlreadyIndexed,
            document: existing,
            session: session_state.view(),
        }));
    }

    let summary = state
        .backend
        .ingest_pdf(bytes, &thread_id, &filename)
        .await?;
    tracing::info!(
        thread_id = %thread_id,
        filename = %summary.filename,
        pages = summary.documents,
        chunks = summary.chunks,
        "PDF indexed"
    );

    // Keyed by the uploaded name so the presence check matches the next upload
    session_state.thread_docs_mut().insert(IngestSummary {
        filename: filename.clone(),
        ..summary.clone()
    });

    Ok(Json(UploadResponse {
        status: UploadStatus::Indexed,
        document: summary,
        session: session_state.view(),
    }))
}

async fn read_upload(multipart: &mut Multipart) -> ApiResult<(String, Vec<u8>)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| ApiError::BadRequest("upload is missing a filename".to_string()))?;

        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;

        if bytes.is_empty() {
            return Err(ApiError::BadRequest(format!("{} is empty", filename)));
        }

        return Ok((filename, bytes.to_vec()));
    }

    Err(ApiError::BadRequest(format!(
        "multipart field '{}' is required",
        UPLOAD_FIELD
    )))
}

/// PDF by extension, or by magic bytes when the name has no `.pdf` suffix
pub fn is_pdf(filename: &str, bytes: &[u8]) -> bool {
    filename.to_ascii_lowercase().ends_with(".pdf") || bytes.starts_with(PDF_MAGIC)
}
