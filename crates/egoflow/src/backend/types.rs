//! Wire types exchanged with the reasoning backend.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body sent as the `request_data` part of thought and synthesis calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReasoningRequest {
    pub query: String,
    pub mode: String,
    pub chat_history: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub thoughts_history: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<String>,
}

/// A decoded file forwarded to the backend as a multipart `files` part.
#[derive(Debug, Clone, PartialEq)]
pub struct FileData {
    pub name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

/// A tool invocation requested by a thought.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    pub tool_query: String,
}

/// One reasoning step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThoughtStep {
    #[serde(default)]
    pub thoughts: String,
    #[serde(default)]
    pub evaluate: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub tool_reasoning: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, rename = "thoughts_header")]
    pub header: String,
    #[serde(default, rename = "nextThoughtNeeded")]
    pub next_thought_needed: bool,
}

/// Token accounting reported by the backend. Fields may be absent or null.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(
        default,
        rename = "promptTokenCount",
        skip_serializing_if = "Option::is_none"
    )]
    pub prompt_tokens: Option<u64>,
    #[serde(
        default,
        rename = "candidatesTokenCount",
        skip_serializing_if = "Option::is_none"
    )]
    pub completion_tokens: Option<u64>,
    #[serde(
        default,
        rename = "totalTokenCount",
        skip_serializing_if = "Option::is_none"
    )]
    pub total_tokens: Option<u64>,
}

/// Response of the thought endpoint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ThoughtResponse {
    pub thought: ThoughtStep,
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub uploaded_file_uris: Vec<String>,
}

/// One decoded synthesis frame: `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl StreamFrame {
    pub const CHUNK: &'static str = "chunk";
    pub const ERROR: &'static str = "error";
    pub const DONE: &'static str = "done";
    pub const USAGE: &'static str = "usage";

    /// Text carried by a `chunk` frame.
    pub fn chunk_text(&self) -> Option<&str> {
        if self.kind != Self::CHUNK {
            return None;
        }
        self.data.get("text").and_then(Value::as_str)
    }

    /// Message carried by an `error` frame, falling back to the raw payload.
    pub fn error_message(&self) -> String {
        self.data
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.data.to_string())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ToolRequest<'a> {
    pub query: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ToolResponse {
    pub result: Option<String>,
}
