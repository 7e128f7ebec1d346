//! Per-browser-session UI state.
//!
//! A session lives as long as its cookie, which carries no expiry and is
//! therefore dropped by the browser when the browser session ends. The
//! server side drops a session once it has been idle for the configured
//! timeout. Nothing here is persisted; conversation history survives only
//! through the backend's thread store.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use docchat_backend::{ChatMessage, IngestSummary, ThreadId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "docchat_session";

const THREAD_LABEL_CHARS: usize = 12;

pub type SessionId = String;
pub type SharedSession = Arc<Mutex<SessionState>>;

pub fn generate_thread_id() -> ThreadId {
    uuid::Uuid::new_v4().to_string()
}

/// Short sidebar label for a thread: first 12 characters and an ellipsis
pub fn thread_label(thread_id: &str) -> String {
    let prefix: String = thread_id.chars().take(THREAD_LABEL_CHARS).collect();
    format!("{}...", prefix)
}

/// Documents ingested for one thread, in upload order
#[derive(Debug, Clone, Default)]
pub struct ThreadDocuments {
    docs: Vec<IngestSummary>,
}

impl ThreadDocuments {
    pub fn contains(&self, filename: &str) -> bool {
        self.get(filename).is_some()
    }

    pub fn get(&self, filename: &str) -> Option<&IngestSummary> {
        self.docs.iter().find(|d| d.filename == filename)
    }

    /// Store a summary under its filename; a re-ingested file keeps its position
    pub fn insert(&mut self, summary: IngestSummary) {
        match self.docs.iter_mut().find(|d| d.filename == summary.filename) {
            Some(existing) => *existing = summary,
            None => self.docs.push(summary),
        }
    }

    /// Most recently added document
    pub fn latest(&self) -> Option<&IngestSummary> {
        self.docs.last()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub thread_id: ThreadId,
    pub message_history: Vec<ChatMessage>,
    /// Known threads, oldest first
    pub chat_threads: Vec<ThreadId>,
    pub ingested_docs: HashMap<ThreadId, ThreadDocuments>,
}

impl SessionState {
    /// Fresh session on a new thread
    pub fn new(chat_threads: Vec<ThreadId>) -> Self {
        Self {
            thread_id: generate_thread_id(),
            message_history: Vec::new(),
            chat_threads,
            ingested_docs: HashMap::new(),
        }
    }

    /// Start a new conversation: new thread id, empty history
    pub fn reset_chat(&mut self) {
        self.thread_id = generate_thread_id();
        self.message_history.clear();
    }

    /// Make `thread_id` active with the history loaded from the backend
    pub fn switch_thread(&mut self, thread_id: ThreadId, messages: Vec<ChatMessage>) {
        self.thread_id = thread_id;
        self.message_history = messages;
    }

    /// List the active thread under past chats once it has content
    pub fn remember_active_thread(&mut self) {
        if !self.chat_threads.contains(&self.thread_id) {
            self.chat_threads.push(self.thread_id.clone());
        }
    }

    pub fn thread_docs(&self) -> Option<&ThreadDocuments> {
        self.ingested_docs.get(&self.thread_id)
    }

    pub fn thread_docs_mut(&mut self) -> &mut ThreadDocuments {
        self.ingested_docs
            .entry(self.thread_id.clone())
            .or_default()
    }

    pub fn latest_document(&self) -> Option<&IngestSummary> {
        self.thread_docs().and_then(ThreadDocuments::latest)
    }

    /// Past chats, newest first
    pub fn past_chats(&self) -> Vec<ThreadEntry> {
        self.chat_threads
            .iter()
            .rev()
            .map(|thread_id| ThreadEntry {
                thread_id: thread_id.clone(),
                label: thread_label(thread_id),
                active: *thread_id == self.thread_id,
            })
            .collect()
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            thread_id: self.thread_id.clone(),
            messages: self.message_history.clone(),
            threads: self.past_chats(),
            document: self.latest_document().cloned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadEntry {
    pub thread_id: ThreadId,
    pub label: String,
    pub active: bool,
}

/// Everything the page needs to redraw
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub thread_id: ThreadId,
    pub messages: Vec<ChatMessage>,
    pub threads: Vec<ThreadEntry>,
    pub document: Option<IngestSummary>,
}

/// Session attached to a request by [`attach_session`]
#[derive(Clone)]
pub struct Session {
    pub id: SessionId,
    pub state: SharedSession,
}

struct StoredSession {
    state: SharedSession,
    last_seen: Instant,
}

impl StoredSession {
    fn is_idle(&self, idle_timeout: Duration) -> bool {
        self.last_seen.elapsed() >= idle_timeout
    }
}

/// Sessions by id, dropped after `idle_timeout` without a request
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, StoredSession>>,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    pub async fn create(&self, state: SessionState) -> Session {
        let id = uuid::Uuid::new_v4().to_string();
        let shared = Arc::new(Mutex::new(state));
        self.sessions.write().await.insert(
            id.clone(),
            StoredSession {
                state: Arc::clone(&shared),
                last_seen: Instant::now(),
            },
        );

        Session { id, state: shared }
    }

    /// Live session for `id`, refreshing its idle clock
    ///
    /// An expired session is removed and reported as unknown.
    pub async fn get(&self, id: &str) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        let stored = sessions.get_mut(id)?;

        if stored.is_idle(self.idle_timeout) {
            sessions.remove(id);
            tracing::debug!(session_id = id, "Session expired");
            return None;
        }

        stored.last_seen = Instant::now();
        Some(Session {
            id: id.to_string(),
            state: Arc::clone(&stored.state),
        })
    }

    /// Drop every idle session, returning how many were removed
    pub async fn evict_idle(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, stored| !stored.is_idle(self.idle_timeout));
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Periodically evict idle sessions; runs for the life of the server
pub async fn sweep_idle_sessions(store: Arc<SessionStore>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let evicted = store.evict_idle().await;
        if evicted > 0 {
            let remaining = store.len().await;
            tracing::info!(evicted, remaining, "Evicted idle sessions");
        }
    }
}

/// Session id from the `Cookie` header(s), if present
pub fn session_cookie(headers: &HeaderMap) -> Option<SessionId> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn set_cookie_header(id: &str) -> ApiResult<HeaderValue> {
    // No Max-Age/Expires: a browser-session cookie
    HeaderValue::from_str(&format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax",
        SESSION_COOKIE, id
    ))
    .map_err(|_| ApiError::Internal)
}

/// Resolve the caller's session, creating one on first contact
///
/// New sessions start on a fresh thread with the backend's thread list.
pub async fn attach_session(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> ApiResult<Response> {
    let existing = match session_cookie(req.headers()) {
        Some(id) => state.sessions.get(&id).await,
        None => None,
    };

    if let Some(session) = existing {
        req.extensions_mut().insert(session);
        return Ok(next.run(req).await);
    }

    let chat_threads = state.backend.retrieve_all_threads().await?;
    let known_threads = chat_threads.len();
    let session = state.sessions.create(SessionState::new(chat_threads)).await;
    tracing::info!(session_id = %session.id, known_threads, "Session created");

    let cookie = set_cookie_header(&session.id)?;
    req.extensions_mut().insert(session);

    let mut response = next.run(req).await;
    response.headers_mut().append(header::SET_COOKIE, cookie);
    Ok(response)
}
