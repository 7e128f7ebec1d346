use crate::error::Result;
use crate::types::{ChunkMetadata, IngestSummary, StreamChunk, ThreadId, ThreadState};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Lazy, finite, non-restartable sequence of chunks for one assistant turn
pub type TurnStream = Pin<Box<dyn Stream<Item = Result<(StreamChunk, ChunkMetadata)>> + Send>>;

/// Contract of the retrieval-augmented chat backend
///
/// The backend owns everything that matters: retrieval, the agent loop and
/// conversation persistence. Callers only address it by thread id.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Full history of a thread
    async fn get_state(&self, thread_id: &str) -> Result<ThreadState>;

    /// Run one turn and stream assistant output and tool notices
    async fn stream(&self, input: &str, thread_id: &str) -> Result<TurnStream>;

    /// Index a PDF for later retrieval within the thread
    async fn ingest_pdf(
        &self,
        bytes: Vec<u8>,
        thread_id: &str,
        filename: &str,
    ) -> Result<IngestSummary>;

    /// Every thread the backend knows about, oldest first
    async fn retrieve_all_threads(&self) -> Result<Vec<ThreadId>>;
}
