use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use async_trait::async_trait;
use docchat_backend::{
    BackendError, ChatBackend, ChunkMetadata, HttpBackend, IngestSummary, MemoryBackend,
    StreamChunk, ThreadId, ThreadState, TurnStream, WireMessage,
};
use docchat_web::{build_router, config::Config, error::ApiError, state::AppState};
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tower::ServiceExt;

const BOUNDARY: &str = "docchat-test-boundary";

fn app(backend: Arc<dyn ChatBackend>) -> Router {
    build_router(Arc::new(AppState::new(Config::default(), backend)))
}

/// Backend that replays fixed chunks, optionally holding the turn until released
struct ScriptedBackend {
    chunks: Vec<StreamChunk>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl ScriptedBackend {
    fn new(chunks: Vec<StreamChunk>) -> Self {
        Self {
            chunks,
            gate: Mutex::new(None),
        }
    }

    /// Turns wait until the returned sender fires
    fn gated(chunks: Vec<StreamChunk>) -> (Self, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        let backend = Self {
            chunks,
            gate: Mutex::new(Some(rx)),
        };
        (backend, tx)
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn get_state(&self, _thread_id: &str) -> docchat_backend::Result<ThreadState> {
        Ok(ThreadState::default())
    }

    async fn stream(&self, _input: &str, _thread_id: &str) -> docchat_backend::Result<TurnStream> {
        let chunks = self.chunks.clone();
        let gate = self.gate.lock().unwrap().take();

        let turn = futures::stream::once(async move {
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            futures::stream::iter(
                chunks
                    .into_iter()
                    .map(|chunk| Ok::<_, BackendError>((chunk, ChunkMetadata::default()))),
            )
        })
        .flatten();

        Ok(Box::pin(turn))
    }

    async fn ingest_pdf(
        &self,
        _bytes: Vec<u8>,
        _thread_id: &str,
        _filename: &str,
    ) -> docchat_backend::Result<IngestSummary> {
        Err(BackendError::Stream("ingestion not scripted".to_string()))
    }

    async fn retrieve_all_threads(&self) -> docchat_backend::Result<Vec<ThreadId>> {
        Ok(Vec::new())
    }
}

async fn send(app: &Router, req: Request<Body>) -> Response {
    app.clone().oneshot(req).await.unwrap()
}

fn get(uri: &str, cookie: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, cookie: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::COOKIE, cookie)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_empty(uri: &str, cookie: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

fn upload(cookie: &str, filename: &str, bytes: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
            filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/documents")
        .header(header::COOKIE, cookie)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn body_text(resp: Response) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(resp: Response) -> Value {
    serde_json::from_str(&body_text(resp).await).unwrap()
}

/// `name=value` part of the Set-Cookie header
fn session_cookie(resp: &Response) -> String {
    resp.headers()
        .get(header::SET_COOKIE)
        .expect("session cookie")
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string()
}

/// Open a session and return its cookie with the initial view
async fn open_session(app: &Router) -> (String, Value) {
    let resp = send(app, get("/api/session", "")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let cookie = session_cookie(&resp);
    (cookie, body_json(resp).await)
}

/// (event name, JSON payload) pairs from an SSE body
fn sse_events(body: &str) -> Vec<(String, Value)> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut name = None;
            let mut data = None;
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    name = Some(v.trim().to_string());
                } else if let Some(v) = line.strip_prefix("data:") {
                    data = serde_json::from_str(v.trim()).ok();
                }
            }
            Some((name?, data?))
        })
        .collect()
}

fn pdf(pages: usize) -> Vec<u8> {
    let mut bytes = b"%PDF-1.4\n".to_vec();
    for _ in 0..pages {
        bytes.extend_from_slice(b"<< /Type /Page >>\n");
    }
    bytes.extend_from_slice(b"%%EOF");
    bytes
}

#[tokio::test]
async fn test_index_page() {
    let app = app(Arc::new(MemoryBackend::new()));

    let resp = send(&app, get("/", "")).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let html = body_text(resp).await;
    assert!(html.contains("<title>Multi Utility Chatbot</title>"));
    assert!(html.contains("Ask anything or query your document"));
}

#[tokio::test]
async fn test_health_check() {
    let app = app(Arc::new(MemoryBackend::new()));

    let resp = send(&app, get("/health", "")).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["services"]["backend"], "connected");
}

#[tokio::test]
async fn test_session_starts_with_backend_threads() {
    let backend =
        MemoryBackend::new().with_threads(["1111111111111111-old", "2222222222222222-new"]);
    let app = app(Arc::new(backend));

    let (cookie, view) = open_session(&app).await;

    assert!(cookie.starts_with("docchat_session="));
    assert!(view["messages"].as_array().unwrap().is_empty());
    assert!(view["document"].is_null());

    let threads = view["threads"].as_array().unwrap();
    assert_eq!(threads.len(), 2);
    assert_eq!(threads[0]["thread_id"], "2222222222222222-new");
    assert_eq!(threads[0]["label"], "222222222222...");

    // Same cookie, same session, no new cookie
    let resp = send(&app, get("/api/session", &cookie)).await;
    assert!(resp.headers().get(header::SET_COOKIE).is_none());
    assert_eq!(body_json(resp).await["thread_id"], view["thread_id"]);
}

#[tokio::test]
async fn test_new_chat_resets_thread() {
    let app = app(Arc::new(MemoryBackend::new()));
    let (cookie, view) = open_session(&app).await;

    let resp = send(&app, post_json("/api/messages", &cookie, json!({"content": "hi"}))).await;
    body_text(resp).await;

    let resp = send(&app, post_empty("/api/threads", &cookie)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let fresh = body_json(resp).await;

    assert_ne!(fresh["thread_id"], view["thread_id"]);
    assert!(fresh["messages"].as_array().unwrap().is_empty());
    // The thread that got a message is now a past chat
    assert_eq!(fresh["threads"][0]["thread_id"], view["thread_id"]);
}

#[tokio::test]
async fn test_streamed_turn_with_tool_notice() {
    let backend = MemoryBackend::new()
        .with_tool_call("rag_tool")
        .with_reply(["Revenue", " grew", " 12%."]);
    let app = app(Arc::new(backend));
    let (cookie, _) = open_session(&app).await;

    let resp = send(
        &app,
        post_json("/api/messages", &cookie, json!({"content": "How did revenue change?"})),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let events = sse_events(&body_text(resp).await);
    let names: Vec<&str> = events.iter().map(|(name, _)| name.as_str()).collect();

    assert_eq!(
        names,
        vec!["tool", "token", "token", "token", "tool_complete", "done"]
    );
    assert_eq!(events[0].1["name"], "rag_tool");
    assert_eq!(events[0].1["label"], "Using tool: `rag_tool`");
    assert_eq!(events[4].1["label"], "Tool completed");
    assert_eq!(events[5].1["content"], "Revenue grew 12%.");

    let resp = send(&app, get("/api/messages", &cookie)).await;
    let history = body_json(resp).await;
    assert_eq!(
        history["messages"],
        json!([
            {"role": "user", "content": "How did revenue change?"},
            {"role": "assistant", "content": "Revenue grew 12%."}
        ])
    );
}

#[tokio::test]
async fn test_turn_without_tool_has_no_notice() {
    let app = app(Arc::new(MemoryBackend::new()));
    let (cookie, _) = open_session(&app).await;

    let req = post_json("/api/messages", &cookie, json!({"content": "ping"}));
    let resp = send(&app, req).await;
    let events = sse_events(&body_text(resp).await);

    assert!(events.iter().all(|(name, _)| name != "tool" && name != "tool_complete"));
    assert_eq!(events.last().unwrap().1["content"], "You said: ping");
}

#[tokio::test]
async fn test_failed_stream_keeps_only_user_message() {
    let backend = MemoryBackend::new().with_reply(["partial", " reply"]).fail_stream_after(1);
    let app = app(Arc::new(backend));
    let (cookie, _) = open_session(&app).await;

    let req = post_json("/api/messages", &cookie, json!({"content": "hello"}));
    let resp = send(&app, req).await;
    let events = sse_events(&body_text(resp).await);
    let names: Vec<&str> = events.iter().map(|(name, _)| name.as_str()).collect();

    assert_eq!(names, vec!["token", "error"]);

    let history = body_json(send(&app, get("/api/messages", &cookie)).await).await;
    assert_eq!(
        history["messages"],
        json!([{"role": "user", "content": "hello"}])
    );
}

#[tokio::test]
async fn test_empty_message_rejected() {
    let app = app(Arc::new(MemoryBackend::new()));
    let (cookie, _) = open_session(&app).await;

    let resp = send(&app, post_json("/api/messages", &cookie, json!({"content": "   "}))).await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let history = body_json(send(&app, get("/api/messages", &cookie)).await).await;
    assert!(history["messages"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_pdf_ingested_once_per_thread() {
    let backend = Arc::new(MemoryBackend::new());
    let app = app(backend.clone());
    let (cookie, _) = open_session(&app).await;

    let resp = send(&app, upload(&cookie, "report.pdf", &pdf(3))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "indexed");
    assert_eq!(body["document"]["documents"], 3);
    assert_eq!(body["session"]["document"]["filename"], "report.pdf");

    let resp = send(&app, upload(&cookie, "report.pdf", &pdf(3))).await;
    assert_eq!(body_json(resp).await["status"], "already_indexed");
    assert_eq!(backend.ingest_calls(), 1);

    // A new chat has its own document scope
    let fresh = body_json(send(&app, post_empty("/api/threads", &cookie)).await).await;
    assert!(fresh["document"].is_null());

    let resp = send(&app, upload(&cookie, "report.pdf", &pdf(3))).await;
    assert_eq!(body_json(resp).await["status"], "indexed");
    assert_eq!(backend.ingest_calls(), 2);
}

#[tokio::test]
async fn test_latest_document_is_shown() {
    let app = app(Arc::new(MemoryBackend::new()));
    let (cookie, _) = open_session(&app).await;

    send(&app, upload(&cookie, "first.pdf", &pdf(1))).await;
    send(&app, upload(&cookie, "second.pdf", &pdf(4))).await;

    let view = body_json(send(&app, get("/api/session", &cookie)).await).await;
    assert_eq!(view["document"]["filename"], "second.pdf");
    assert_eq!(view["document"]["chunks"], 4);
}

#[tokio::test]
async fn test_non_pdf_upload_rejected() {
    let backend = Arc::new(MemoryBackend::new());
    let app = app(backend.clone());
    let (cookie, _) = open_session(&app).await;

    let resp = send(&app, upload(&cookie, "notes.txt", b"just text")).await;

    assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(backend.ingest_calls(), 0);
}

#[tokio::test]
async fn test_activate_past_thread() {
    let backend = MemoryBackend::new().with_history(
        "t-past",
        vec![
            WireMessage::new("system", "Answer from the uploaded PDF."),
            WireMessage::human("What is in the PDF?"),
            WireMessage::ai(""),
            WireMessage::tool("rag_tool", "chunk text"),
            WireMessage::new("tool", "unnamed tool output"),
            WireMessage::ai("A quarterly report."),
        ],
    );
    let app = app(Arc::new(backend));
    let (cookie, _) = open_session(&app).await;

    let resp = send(&app, post_empty("/api/threads/t-past/activate", &cookie)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let view = body_json(resp).await;

    assert_eq!(view["thread_id"], "t-past");
    assert_eq!(
        view["messages"],
        json!([
            {"role": "assistant", "content": "Answer from the uploaded PDF."},
            {"role": "user", "content": "What is in the PDF?"},
            {"role": "assistant", "content": "chunk text"},
            {"role": "assistant", "content": "unnamed tool output"},
            {"role": "assistant", "content": "A quarterly report."}
        ])
    );
    assert_eq!(view["threads"][0]["active"], true);
}

#[tokio::test]
async fn test_unreachable_backend_is_bad_gateway() {
    let backend = HttpBackend::new("http://127.0.0.1:9").unwrap();
    let app = app(Arc::new(backend));

    let resp = send(&app, get("/api/session", "")).await;

    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(resp).await["error"], "Backend unavailable");

    let resp = send(&app, get("/health", "")).await;
    assert_eq!(body_json(resp).await["status"], "degraded");
}

#[tokio::test]
async fn test_api_error_response() {
    use axum::response::IntoResponse;

    let error = ApiError::BadRequest("Test error".to_string());
    let response = error.into_response();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unfamiliar_chunks_do_not_abort_turn() {
    let backend = ScriptedBackend::new(vec![
        StreamChunk::Other,
        StreamChunk::Tool {
            name: None,
            content: "retrieved context".to_string(),
        },
        StreamChunk::Ai {
            content: "answer".to_string(),
        },
    ]);
    let app = app(Arc::new(backend));
    let (cookie, _) = open_session(&app).await;

    let req = post_json("/api/messages", &cookie, json!({"content": "question"}));
    let events = sse_events(&body_text(send(&app, req).await).await);
    let names: Vec<&str> = events.iter().map(|(name, _)| name.as_str()).collect();

    assert_eq!(names, vec!["tool", "token", "tool_complete", "done"]);
    assert_eq!(events[0].1["label"], "Using tool: `tool`");
    assert_eq!(events[3].1["content"], "answer");
}

#[tokio::test]
async fn test_reply_skipped_when_thread_changes_mid_turn() {
    let (backend, release) = ScriptedBackend::gated(vec![StreamChunk::Ai {
        content: "late reply".to_string(),
    }]);
    let app = app(Arc::new(backend));
    let (cookie, view) = open_session(&app).await;

    let req = post_json("/api/messages", &cookie, json!({"content": "slow question"}));
    let turn = send(&app, req).await;
    assert_eq!(turn.status(), StatusCode::OK);

    let fresh = body_json(send(&app, post_empty("/api/threads", &cookie)).await).await;
    assert_ne!(fresh["thread_id"], view["thread_id"]);

    release.send(()).unwrap();
    let events = sse_events(&body_text(turn).await);
    let (name, payload) = events.last().unwrap();
    assert_eq!(name, "done");
    assert_eq!(payload["content"], "late reply");

    let history = body_json(send(&app, get("/api/messages", &cookie)).await).await;
    assert_eq!(history["thread_id"], fresh["thread_id"]);
    assert!(history["messages"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_idle_sessions_are_dropped() {
    let mut config = Config::default();
    config.session.idle_timeout_secs = 0;
    let state = Arc::new(AppState::new(config, Arc::new(MemoryBackend::new())));
    let app = build_router(Arc::clone(&state));

    let (cookie, view) = open_session(&app).await;

    // Expired cookie: a fresh session and a new cookie
    let resp = send(&app, get("/api/session", &cookie)).await;
    let renewed = session_cookie(&resp);
    assert_ne!(renewed, cookie);
    assert_ne!(body_json(resp).await["thread_id"], view["thread_id"]);

    for _ in 0..20 {
        send(&app, get("/api/session", "")).await;
    }
    assert_eq!(state.sessions.len().await, 21);
    assert_eq!(state.sessions.evict_idle().await, 21);
    assert!(state.sessions.is_empty().await);
}
