use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Extension, Json,
};
use docchat_backend::{ChatMessage, ChunkMetadata, StreamChunk, ThreadId, TurnStream};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    error::{ApiError, ApiResult},
    session::{Session, SharedSession},
    state::AppState,
};

const EVENT_BUFFER: usize = 64;
const UNNAMED_TOOL: &str = "tool";

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

/// What the page receives while a turn streams
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TurnEvent {
    Token { content: String },
    Tool { name: String, label: String },
    ToolComplete { label: String },
    Done { content: String },
    Error { error: String },
}

impl TurnEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TurnEvent::Token { .. } => "token",
            TurnEvent::Tool { .. } => "tool",
            TurnEvent::ToolComplete { .. } => "tool_complete",
            TurnEvent::Done { .. } => "done",
            TurnEvent::Error { .. } => "error",
        }
    }

    pub fn into_sse(self) -> Event {
        let name = self.name();
        Event::default()
            .event(name)
            .json_data(&self)
            .unwrap_or_else(|e| {
                tracing::error!("Failed to encode {} event: {}", name, e);
                Event::default().event("error").data("{}")
            })
    }
}

/// Folds one turn's chunks into UI events and the final reply
///
/// At most one tool notice is shown per turn, however many tools run.
#[derive(Debug, Default)]
pub struct TurnRenderer {
    reply: String,
    tool_shown: bool,
}

impl TurnRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_chunk(
        &mut self,
        chunk: StreamChunk,
        metadata: &ChunkMetadata,
    ) -> Option<TurnEvent> {
        match chunk {
            StreamChunk::Tool { name, .. } => {
                if self.tool_shown {
                    return None;
                }
                self.tool_shown = true;
                let name = name.unwrap_or_else(|| UNNAMED_TOOL.to_string());
                tracing::debug!(tool = %name, node = ?metadata.node(), "Tool invoked");
                Some(TurnEvent::Tool {
                    label: format!("Using tool: `{}`", name),
                    name,
                })
            }
            StreamChunk::Ai { content } => {
                if content.is_empty() {
                    return None;
                }
                self.reply.push_str(&content);
                Some(TurnEvent::Token { content })
            }
            StreamChunk::Human { .. } | StreamChunk::Other => None,
        }
    }

    /// Closing tool notice (if a tool ran) and the accumulated reply
    pub fn finish(self) -> (Option<TurnEvent>, String) {
        let complete = self.tool_shown.then(|| TurnEvent::ToolComplete {
            label: "Tool completed".to_string(),
        });
        (complete, self.reply)
    }
}

/// Send a message and stream the assistant reply using Server-Sent Events
///
/// The user message joins the history before the backend is called. The
/// reply joins it once the stream finishes cleanly; the turn keeps running
/// if the browser goes away mid-stream.
pub async fn send_message_stream(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    if req.content.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }

    let thread_id = {
        let mut session_state = session.state.lock().await;
        session_state
            .message_history
            .push(ChatMessage::user(req.content.clone()));
        session_state.remember_active_thread();
        session_state.thread_id.clone()
    };

    tracing::info!(session_id = %session.id, thread_id = %thread_id, "Chat turn started");
    let turn = state.backend.stream(&req.content, &thread_id).await?;

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    tokio::spawn(run_turn(turn, tx, Arc::clone(&session.state), thread_id));

    let sse_stream =
        ReceiverStream::new(rx).map(|event| Ok::<Event, Infallible>(event.into_sse()));

    Ok(Sse::new(sse_stream).keep_alive(KeepAlive::default()))
}

/// Drain the backend stream, forwarding UI events, then record the reply
pub async fn run_turn(
    mut turn: TurnStream,
    tx: mpsc::Sender<TurnEvent>,
    session: SharedSession,
    thread_id: ThreadId,
) {
    let mut renderer = TurnRenderer::new();

    while let Some(item) = turn.next().await {
        match item {
            Ok((chunk, metadata)) => {
                if let Some(event) = renderer.on_chunk(chunk, &metadata) {
                    // Receiver gone means the page went away; keep draining
                    let _ = tx.send(event).await;
                }
            }
            Err(e) => {
                tracing::error!(thread_id = %thread_id, "Chat turn failed: {}", e);
                let _ = tx
                    .send(TurnEvent::Error {
                        error: e.to_string(),
                    })
                    .await;
                return;
            }
        }
    }

    let (complete, reply) = renderer.finish();
    if let Some(event) = complete {
        let _ = tx.send(event).await;
    }

    {
        let mut session_state = session.lock().await;
        // The user may have switched threads while the turn was running
        if session_state.thread_id == thread_id {
            session_state
                .message_history
                .push(ChatMessage::assistant(reply.clone()));
        }
    }

    tracing::info!(thread_id = %thread_id, reply_chars = reply.len(), "Chat turn completed");
    let _ = tx.send(TurnEvent::Done { content: reply }).await;
}
