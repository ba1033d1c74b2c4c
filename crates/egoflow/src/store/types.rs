//! Durable record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type UserId = i64;
pub type SessionId = i64;
pub type ExchangeId = i64;
pub type AttachmentId = i64;

/// A conversation owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub title: String,
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to create a session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: UserId,
    pub title: String,
    pub mode: String,
}

/// Accumulated token counters of one exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, prompt: u64, completion: u64, total: u64) {
        self.prompt_tokens += prompt;
        self.completion_tokens += completion;
        self.total_tokens += total;
    }
}

/// One persisted query/response round within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub id: ExchangeId,
    pub session_id: SessionId,
    pub user_id: UserId,
    /// Server-assigned idempotency token.
    pub token: String,
    pub query: String,
    pub mode: String,
    /// Ordered thought history (thoughts, tool outputs, system errors).
    pub thoughts: Value,
    pub final_response: String,
    pub attachment_ids: Vec<AttachmentId>,
    pub usage: TokenUsage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewExchange {
    pub token: String,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub query: String,
    pub mode: String,
    pub thoughts: Value,
    pub final_response: String,
    pub attachment_ids: Vec<AttachmentId>,
    pub usage: TokenUsage,
}

/// Replacement result written over an existing exchange on regeneration.
#[derive(Debug, Clone)]
pub struct ExchangeResult {
    pub thoughts: Value,
    pub final_response: String,
}

/// Lifecycle of an attachment row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentStatus {
    /// Stored, not yet associated with an exchange.
    Uploaded,
    /// Associated with a persisted exchange.
    Linked,
}

/// Metadata of an uploaded file; the bytes live in the blob store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: AttachmentId,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub exchange_id: Option<ExchangeId>,
    pub file_name: String,
    pub mime_type: String,
    pub storage_key: String,
    pub size_bytes: u64,
    pub status: AttachmentStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub file_name: String,
    pub mime_type: String,
    pub storage_key: String,
    pub size_bytes: u64,
}
