use axum::{Extension, Json};
use docchat_backend::{ChatMessage, ThreadId};
use serde::Serialize;

use crate::session::Session;

#[derive(Debug, Serialize)]
pub struct ListMessagesResponse {
    pub thread_id: ThreadId,
    pub messages: Vec<ChatMessage>,
}

/// Message history of the active thread, in arrival order
pub async fn list_messages(Extension(session): Extension<Session>) -> Json<ListMessagesResponse> {
    let state = session.state.lock().await;

    Json(ListMessagesResponse {
        thread_id: state.thread_id.clone(),
        messages: state.message_history.clone(),
    })
}
