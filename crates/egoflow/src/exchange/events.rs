//! Client-facing event envelope and the sink trait producers write to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::backend::{StreamFrame, ToolCall, Usage};
use crate::store::{ExchangeId, Session};

/// `{"type": ..., "data": ...}`, the only structure sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

pub const STATUS: &str = "status";
pub const SESSION_CREATED: &str = "session_created";
pub const THOUGHT_HEADER: &str = "thought_header";
pub const USAGE_UPDATE: &str = "usage_update";
pub const TOOL_CALL: &str = "tool_call";
pub const TOOL_OUTPUT: &str = "tool_output";
pub const TOOL_ERROR: &str = "tool_error";
pub const LOG_SAVED: &str = "log_saved";
pub const DONE: &str = "done";
pub const ERROR: &str = "error";

impl Event {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    pub fn status(phase: &str) -> Self {
        Self::new(STATUS, json!({ "phase": phase }))
    }

    pub fn session_created(session: &Session) -> Self {
        Self::new(
            SESSION_CREATED,
            json!({
                "id": session.id,
                "title": session.title,
                "mode": session.mode,
                "custom_instructions": session.custom_instructions,
                "created_at": session.created_at,
            }),
        )
    }

    pub fn thought_header(header: &str) -> Self {
        Self::new(THOUGHT_HEADER, Value::String(header.to_string()))
    }

    pub fn usage_update(usage: &Usage) -> Self {
        Self::new(
            USAGE_UPDATE,
            json!({
                "promptTokenCount": usage.prompt_tokens,
                "candidatesTokenCount": usage.completion_tokens,
                "totalTokenCount": usage.total_tokens,
            }),
        )
    }

    pub fn tool_call(call: &ToolCall) -> Self {
        Self::new(
            TOOL_CALL,
            json!({ "tool_name": call.tool_name, "tool_query": call.tool_query }),
        )
    }

    pub fn tool_output(tool_name: &str, output: &str) -> Self {
        Self::new(
            TOOL_OUTPUT,
            json!({ "tool_name": tool_name, "output": output }),
        )
    }

    pub fn tool_error(tool_name: &str, error: &str) -> Self {
        Self::new(TOOL_ERROR, json!({ "tool_name": tool_name, "error": error }))
    }

    /// A synthesis frame forwarded unchanged.
    pub fn frame(frame: StreamFrame) -> Self {
        Self::new(frame.kind, frame.data)
    }

    pub fn log_saved(temp_id: Option<i64>, log_id: ExchangeId) -> Self {
        Self::new(LOG_SAVED, json!({ "temp_id": temp_id, "log_id": log_id }))
    }

    pub fn done() -> Self {
        Self::new(DONE, json!({ "message": "completed" }))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ERROR, json!({ "message": message.into() }))
    }

    /// `done` and `error` end an exchange.
    pub fn is_terminal(&self) -> bool {
        self.kind == DONE || self.kind == ERROR
    }

    /// Events that must not be dropped when a consumer lags.
    pub fn is_priority(&self) -> bool {
        self.is_terminal() || self.kind == LOG_SAVED
    }

    /// Serialized envelope.
    pub fn to_json(&self) -> String {
        json!({ "type": self.kind, "data": self.data }).to_string()
    }
}

/// Destination for the events of one exchange.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: Event);
}
