use async_trait::async_trait;
use serde_json::{json, Map};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::error::{BackendError, Result};
use crate::traits::{ChatBackend, TurnStream};
use crate::types::{
    ChunkMetadata, IngestSummary, StreamChunk, ThreadId, ThreadState, WireMessage,
};

/// In-process backend with scripted replies
///
/// Runs the UI without a backend service and backs the test suites.
/// Replies echo the input unless a script is configured.
#[derive(Default)]
pub struct MemoryBackend {
    threads: RwLock<Vec<ThreadId>>,
    states: RwLock<HashMap<ThreadId, Vec<WireMessage>>>,
    reply: Option<Vec<String>>,
    tool: Option<String>,
    fail_after: Option<usize>,
    ingest_calls: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Threads known before any turn runs, oldest first
    pub fn with_threads<I, S>(mut self, threads: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ThreadId>,
    {
        self.threads = RwLock::new(threads.into_iter().map(Into::into).collect());
        self
    }

    /// Seed the stored history of a thread
    pub fn with_history(
        mut self,
        thread_id: impl Into<ThreadId>,
        messages: Vec<WireMessage>,
    ) -> Self {
        let thread_id = thread_id.into();
        let threads = self.threads.get_mut();
        if !threads.contains(&thread_id) {
            threads.push(thread_id.clone());
        }
        self.states.get_mut().insert(thread_id, messages);
        self
    }

    /// Tokens streamed for every turn instead of the echo
    pub fn with_reply<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reply = Some(tokens.into_iter().map(Into::into).collect());
        self
    }

    /// Make every turn call a tool before answering
    pub fn with_tool_call(mut self, name: impl Into<String>) -> Self {
        self.tool = Some(name.into());
        self
    }

    /// Break the stream with an error after `n` chunks
    pub fn fail_stream_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Number of `ingest_pdf` calls served so far
    pub fn ingest_calls(&self) -> usize {
        self.ingest_calls.load(Ordering::SeqCst)
    }

    fn reply_tokens(&self, input: &str) -> Vec<String> {
        if let Some(tokens) = &self.reply {
            return tokens.clone();
        }

        let echo = format!("You said: {}", input);
        let mut tokens = Vec::new();
        for (idx, word) in echo.split(' ').enumerate() {
            if idx == 0 {
                tokens.push(word.to_string());
            } else {
                tokens.push(format!(" {}", word));
            }
        }
        tokens
    }

    async fn remember_thread(&self, thread_id: &str) {
        let mut threads = self.threads.write().await;
        if !threads.iter().any(|t| t == thread_id) {
            threads.push(thread_id.to_string());
        }
    }
}

fn node_metadata(node: &str) -> ChunkMetadata {
    let mut map = Map::new();
    map.insert("langgraph_node".to_string(), json!(node));
    ChunkMetadata(map)
}

/// Page count from `/Type /Page` object markers (`/Pages` tree nodes excluded)
fn count_pdf_pages(bytes: &[u8]) -> u32 {
    const TYPE_KEY: &[u8] = b"/Type";
    const PAGE_NAME: &[u8] = b"/Page";

    let mut pages = 0;
    let mut pos = 0;
    while let Some(offset) = find(&bytes[pos..], TYPE_KEY) {
        let mut cursor = pos + offset + TYPE_KEY.len();
        while cursor < bytes.len() && bytes[cursor].is_ascii_whitespace() {
            cursor += 1;
        }
        if bytes[cursor..].starts_with(PAGE_NAME) {
            let after = cursor + PAGE_NAME.len();
            if bytes.get(after).map_or(true, |b| !b.is_ascii_alphanumeric()) {
                pages += 1;
            }
        }
        pos = cursor;
    }
    pages
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[async_trait]
impl ChatBackend for MemoryBackend {
    async fn get_state(&self, thread_id: &str) -> Result<ThreadState> {
        let states = self.states.read().await;
        Ok(ThreadState {
            messages: states.get(thread_id).cloned().unwrap_or_default(),
        })
    }

    async fn stream(&self, input: &str, thread_id: &str) -> Result<TurnStream> {
        self.remember_thread(thread_id).await;

        let mut chunks: Vec<(StreamChunk, ChunkMetadata)> = Vec::new();
        let mut stored = vec![WireMessage::human(input)];

        if let Some(tool) = &self.tool {
            let result = format!("{} returned context for: {}", tool, input);
            chunks.push((
                StreamChunk::Ai {
                    content: String::new(),
                },
                node_metadata("chat_node"),
            ));
            chunks.push((
                StreamChunk::Tool {
                    name: Some(tool.clone()),
                    content: result.clone(),
                },
                node_metadata("tools"),
            ));
            stored.push(WireMessage::ai(""));
            stored.push(WireMessage::tool(tool.clone(), result));
        }

        let tokens = self.reply_tokens(input);
        stored.push(WireMessage::ai(tokens.concat()));
        for token in tokens {
            chunks.push((StreamChunk::Ai { content: token }, node_metadata("chat_node")));
        }

        self.states
            .write()
            .await
            .entry(thread_id.to_string())
            .or_default()
            .extend(stored);

        let mut items: Vec<Result<(StreamChunk, ChunkMetadata)>> =
            chunks.into_iter().map(Ok).collect();
        if let Some(n) = self.fail_after {
            items.truncate(n);
            items.push(Err(BackendError::Stream("connection reset".to_string())));
        }

        Ok(Box::pin(futures::stream::iter(items)))
    }

    async fn ingest_pdf(
        &self,
        bytes: Vec<u8>,
        thread_id: &str,
        filename: &str,
    ) -> Result<IngestSummary> {
        self.ingest_calls.fetch_add(1, Ordering::SeqCst);
        self.remember_thread(thread_id).await;

        // One chunk per page
        let pages = count_pdf_pages(&bytes);
        tracing::debug!(thread_id, filename, pages, "Indexed PDF in memory");

        Ok(IngestSummary {
            filename: filename.to_string(),
            documents: pages,
            chunks: pages,
        })
    }

    async fn retrieve_all_threads(&self) -> Result<Vec<ThreadId>> {
        Ok(self.threads.read().await.clone())
    }
}
