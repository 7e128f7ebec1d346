pub mod error;
pub mod types;
pub mod traits;
pub mod streaming;
pub mod http;
pub mod memory;

pub use error::{BackendError, Result};
pub use types::{
    ChatMessage, ChunkMetadata, IngestSummary, Role, StreamChunk, ThreadId, ThreadState,
    WireMessage,
};
pub use traits::{ChatBackend, TurnStream};
pub use streaming::{parse_turn_stream, CircularLineBuffer};
pub use http::HttpBackend;
pub use memory::MemoryBackend;
