use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::collections::VecDeque;
use std::fmt::Display;

use crate::error::{BackendError, Result};
use crate::traits::TurnStream;
use crate::types::{ChunkMetadata, StreamChunk};

const DONE_MARKER: &str = "[DONE]";

/// Line buffer for SSE bodies that arrive in arbitrary byte chunks
pub struct CircularLineBuffer {
    buffer: VecDeque<u8>,
}

impl CircularLineBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend(bytes);
    }

    /// Extract next line (up to \n), trimmed
    /// Returns None if no complete line is available
    pub fn next_line(&mut self) -> Option<Result<String>> {
        let newline_pos = self.buffer.iter().position(|&b| b == b'\n')?;
        let line_bytes: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
        Some(decode_line(&line_bytes))
    }

    /// Whatever is left after the body ended without a trailing newline
    pub fn take_remainder(&mut self) -> Option<Result<String>> {
        if self.buffer.is_empty() {
            return None;
        }
        let line_bytes: Vec<u8> = self.buffer.drain(..).collect();
        Some(decode_line(&line_bytes))
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

fn decode_line(bytes: &[u8]) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(|line| line.trim().to_string())
        .map_err(|e| BackendError::Stream(format!("Invalid UTF-8: {}", e)))
}

/// One `data:` payload of a turn stream
#[derive(Debug, Deserialize)]
struct TurnFrame {
    chunk: StreamChunk,
    #[serde(default)]
    metadata: ChunkMetadata,
}

enum LineOutcome {
    Skip,
    Frame(Result<(StreamChunk, ChunkMetadata)>),
    Done,
}

fn parse_line(line: &str) -> LineOutcome {
    // Only data lines carry frames; event/id/retry/comments are ignored
    let Some(data) = line.strip_prefix("data:") else {
        return LineOutcome::Skip;
    };
    let data = data.trim_start();

    if data.is_empty() {
        return LineOutcome::Skip;
    }
    if data == DONE_MARKER {
        return LineOutcome::Done;
    }

    LineOutcome::Frame(
        serde_json::from_str::<TurnFrame>(data)
            .map(|frame| (frame.chunk, frame.metadata))
            .map_err(BackendError::from),
    )
}

/// Turn an SSE byte stream into `(chunk, metadata)` pairs
///
/// Ends at `data: [DONE]` or when the body ends, whichever comes first.
pub fn parse_turn_stream<S, B, E>(body: S) -> TurnStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut byte_chunks = Box::pin(body);
        let mut buffer = CircularLineBuffer::with_capacity(4096);
        let mut finished = false;

        'body: while let Some(chunk_result) = byte_chunks.next().await {
            match chunk_result {
                Ok(bytes) => {
                    buffer.extend(bytes.as_ref());

                    while let Some(line_result) = buffer.next_line() {
                        match line_result {
                            Ok(line) => match parse_line(&line) {
                                LineOutcome::Skip => continue,
                                LineOutcome::Frame(frame) => {
                                    yield frame;
                                }
                                LineOutcome::Done => {
                                    finished = true;
                                    break 'body;
                                }
                            },
                            Err(e) => {
                                yield Err(e);
                            }
                        }
                    }
                }
                Err(e) => {
                    yield Err(BackendError::Stream(e.to_string()));
                    finished = true;
                    break;
                }
            }
        }

        if !finished {
            if let Some(Ok(line)) = buffer.take_remainder() {
                if let LineOutcome::Frame(frame) = parse_line(&line) {
                    yield frame;
                }
            }
        }
    })
}
