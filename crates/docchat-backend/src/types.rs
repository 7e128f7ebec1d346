use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque conversation key, generated client-side and owned by the backend's state store
pub type ThreadId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Message as the chat UI renders it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Message as stored in the backend's thread state
///
/// `kind` is the backend's message type (`human`, `ai`, `tool`, `system`, ...).
/// Types are kept open so a thread with unfamiliar messages still loads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl WireMessage {
    pub const HUMAN: &'static str = "human";
    pub const AI: &'static str = "ai";
    pub const TOOL: &'static str = "tool";

    pub fn new(kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            content: content.into(),
            name: None,
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::new(Self::HUMAN, content)
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::new(Self::AI, content)
    }

    pub fn tool(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(Self::TOOL, content)
        }
    }

    pub fn is_human(&self) -> bool {
        self.kind == Self::HUMAN
    }

    /// Human turns become user messages, everything else is shown as the assistant.
    ///
    /// Returns None for empty content (tool-call-only AI turns).
    pub fn to_chat_message(&self) -> Option<ChatMessage> {
        if self.content.is_empty() {
            return None;
        }

        let role = if self.is_human() {
            Role::User
        } else {
            Role::Assistant
        };

        Some(ChatMessage {
            role,
            content: self.content.clone(),
        })
    }
}

/// Full history of one thread as held by the backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadState {
    #[serde(default)]
    pub messages: Vec<WireMessage>,
}

impl ThreadState {
    pub fn chat_history(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .filter_map(WireMessage::to_chat_message)
            .collect()
    }
}

/// One incremental piece of an assistant turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    /// Assistant output token(s)
    Ai {
        #[serde(default)]
        content: String,
    },

    /// A tool finished and reported back to the agent
    Tool {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default)]
        content: String,
    },

    /// Echo of the user input; the UI already shows it
    Human {
        #[serde(default)]
        content: String,
    },

    /// Any other message type (system, function, ...); not rendered
    #[serde(other)]
    Other,
}

/// Opaque per-chunk metadata (graph node, step, ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkMetadata(pub Map<String, Value>);

impl ChunkMetadata {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Name of the graph node that produced the chunk, if reported
    pub fn node(&self) -> Option<&str> {
        self.get("langgraph_node").and_then(Value::as_str)
    }
}

/// Result of indexing one uploaded PDF within a thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub filename: String,
    /// Page count
    pub documents: u32,
    pub chunks: u32,
}
