//! Durable storage seams.
//!
//! Two traits separate relational metadata (`DurableStore`) from file bytes
//! (`BlobStore`). Both are object-safe so the orchestrator can hold them as
//! `Arc<dyn ...>` and tests can substitute in-memory backends.

mod blob;
mod error;
mod memory;
mod types;

pub use blob::{FileBlobStore, MemoryBlobStore};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use types::{
    Attachment, AttachmentId, AttachmentStatus, Exchange, ExchangeId, ExchangeResult, NewAttachment, NewExchange,
    NewSession, Session, SessionId, TokenUsage, UserId,
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Sessions, exchanges and attachment metadata.
///
/// Every lookup that takes a `UserId` is owner-scoped: a record belonging to
/// another user is reported as absent.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Return the session with `id` owned by the requester, or create a new
    /// one from `new` when `id` is `None` or does not resolve.
    ///
    /// The boolean is `true` when a session was created.
    async fn resolve_session(
        &self,
        id: Option<SessionId>,
        new: NewSession,
    ) -> StorageResult<(Session, bool)>;

    async fn get_session(&self, id: SessionId, user_id: UserId) -> StorageResult<Option<Session>>;

    async fn rename_session(&self, id: SessionId, user_id: UserId, title: &str)
    -> StorageResult<()>;

    async fn update_session_instructions(
        &self,
        id: SessionId,
        user_id: UserId,
        instructions: &str,
    ) -> StorageResult<()>;

    async fn get_exchange(&self, id: ExchangeId, user_id: UserId)
    -> StorageResult<Option<Exchange>>;

    /// Up to `limit` exchanges of a session, newest first, optionally only
    /// those created strictly before `before`.
    async fn recent_exchanges(
        &self,
        session_id: SessionId,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> StorageResult<Vec<Exchange>>;

    /// Insert an exchange; a second insert with the same token returns the
    /// existing id without writing.
    async fn insert_exchange(&self, new: NewExchange) -> StorageResult<ExchangeId>;

    /// Overwrite thoughts and response of an exchange and move its
    /// timestamp to now, making it the newest exchange of its session.
    async fn update_exchange_result(
        &self,
        id: ExchangeId,
        result: ExchangeResult,
    ) -> StorageResult<()>;

    async fn create_attachment(&self, new: NewAttachment) -> StorageResult<AttachmentId>;

    /// Associate stored attachments with a persisted exchange.
    async fn link_attachments(
        &self,
        exchange_id: ExchangeId,
        ids: &[AttachmentId],
    ) -> StorageResult<()>;

    /// Attachments for the given ids; unknown ids are skipped.
    async fn get_attachments(&self, ids: &[AttachmentId]) -> StorageResult<Vec<Attachment>>;

    /// Delete attachment metadata created before `cutoff`, returning the blob
    /// keys that are no longer referenced.
    async fn delete_attachments_before(&self, cutoff: DateTime<Utc>) -> StorageResult<Vec<String>>;
}

/// Opaque byte storage addressed by key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, mime_type: &str, data: Bytes) -> StorageResult<()>;

    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Best-effort removal; missing keys are not an error.
    async fn delete(&self, keys: &[String]) -> StorageResult<()>;
}
