//! In-process durable store backed by concurrent maps.

use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{
    Attachment, AttachmentId, AttachmentStatus, DurableStore, Exchange, ExchangeId, ExchangeResult, NewAttachment,
    NewExchange, NewSession, Session, SessionId, StorageError, StorageResult, UserId,
};

/// `DurableStore` kept entirely in memory.
///
/// Used when no external database is configured and throughout the tests.
/// Timestamps are strictly increasing so that "created before" queries stay
/// deterministic even for records written in the same instant.
pub struct MemoryStore {
    sessions: DashMap<SessionId, Session>,
    exchanges: DashMap<ExchangeId, Exchange>,
    exchange_tokens: DashMap<String, ExchangeId>,
    attachments: DashMap<AttachmentId, Attachment>,
    next_id: AtomicI64,
    clock: Mutex<DateTime<Utc>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            exchanges: DashMap::new(),
            exchange_tokens: DashMap::new(),
            attachments: DashMap::new(),
            next_id: AtomicI64::new(1),
            clock: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn exchange_count(&self) -> usize {
        self.exchanges.len()
    }

    pub fn attachment_count(&self) -> usize {
        self.attachments.len()
    }

    /// All exchanges of a session, oldest first.
    pub fn session_exchanges(&self, session_id: SessionId) -> Vec<Exchange> {
        let mut found: Vec<Exchange> = self
            .exchanges
            .iter()
            .filter(|e| e.session_id == session_id)
            .map(|e| e.value().clone())
            .collect();
        found.sort_by_key(|e| (e.created_at, e.id));
        found
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn now(&self) -> DateTime<Utc> {
        let mut last = self.clock.lock().expect("clock mutex poisoned");
        let mut now = Utc::now();
        if now <= *last {
            now = *last + Duration::microseconds(1);
        }
        *last = now;
        now
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn resolve_session(
        &self,
        id: Option<SessionId>,
        new: NewSession,
    ) -> StorageResult<(Session, bool)> {
        if let Some(id) = id
            && let Some(existing) = self.sessions.get(&id)
            && existing.user_id == new.user_id
        {
            return Ok((existing.clone(), false));
        }

        let now = self.now();
        let session = Session {
            id: self.allocate_id(),
            user_id: new.user_id,
            title: new.title,
            mode: new.mode,
            custom_instructions: None,
            created_at: now,
            updated_at: now,
        };
        self.sessions.insert(session.id, session.clone());
        Ok((session, true))
    }

    async fn get_session(&self, id: SessionId, user_id: UserId) -> StorageResult<Option<Session>> {
        Ok(self
            .sessions
            .get(&id)
            .filter(|s| s.user_id == user_id)
            .map(|s| s.clone()))
    }

    async fn rename_session(
        &self,
        id: SessionId,
        user_id: UserId,
        title: &str,
    ) -> StorageResult<()> {
        let now = self.now();
        match self.sessions.get_mut(&id) {
            Some(mut session) if session.user_id == user_id => {
                session.title = title.to_string();
                session.updated_at = now;
                Ok(())
            }
            _ => Err(StorageError::not_found("session", id)),
        }
    }

    async fn update_session_instructions(
        &self,
        id: SessionId,
        user_id: UserId,
        instructions: &str,
    ) -> StorageResult<()> {
        let now = self.now();
        match self.sessions.get_mut(&id) {
            Some(mut session) if session.user_id == user_id => {
                session.custom_instructions = Some(instructions.to_string());
                session.updated_at = now;
                Ok(())
            }
            _ => Err(StorageError::not_found("session", id)),
        }
    }

    async fn get_exchange(
        &self,
        id: ExchangeId,
        user_id: UserId,
    ) -> StorageResult<Option<Exchange>> {
        Ok(self
            .exchanges
            .get(&id)
            .filter(|e| e.user_id == user_id)
            .map(|e| e.clone()))
    }

    async fn recent_exchanges(
        &self,
        session_id: SessionId,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> StorageResult<Vec<Exchange>> {
        let mut found: Vec<Exchange> = self
            .exchanges
            .iter()
            .filter(|e| e.session_id == session_id)
            .filter(|e| before.is_none_or(|cutoff| e.created_at < cutoff))
            .map(|e| e.value().clone())
            .collect();
        found.sort_by_key(|e| std::cmp::Reverse((e.created_at, e.id)));
        found.truncate(limit);
        Ok(found)
    }

    async fn insert_exchange(&self, new: NewExchange) -> StorageResult<ExchangeId> {
        match self.exchange_tokens.entry(new.token.clone()) {
            Entry::Occupied(existing) => Ok(*existing.get()),
            Entry::Vacant(slot) => {
                let now = self.now();
                let exchange = Exchange {
                    id: self.allocate_id(),
                    session_id: new.session_id,
                    user_id: new.user_id,
                    token: new.token,
                    query: new.query,
                    mode: new.mode,
                    thoughts: new.thoughts,
                    final_response: new.final_response,
                    attachment_ids: new.attachment_ids,
                    usage: new.usage,
                    created_at: now,
                    updated_at: now,
                };
                let id = exchange.id;
                self.exchanges.insert(id, exchange);
                slot.insert(id);
                Ok(id)
            }
        }
    }

    async fn update_exchange_result(
        &self,
        id: ExchangeId,
        result: ExchangeResult,
    ) -> StorageResult<()> {
        let now = self.now();
        let mut exchange = self
            .exchanges
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found("exchange", id))?;
        exchange.thoughts = result.thoughts;
        exchange.final_response = result.final_response;
        exchange.created_at = now;
        exchange.updated_at = now;
        Ok(())
    }

    async fn create_attachment(&self, new: NewAttachment) -> StorageResult<AttachmentId> {
        let attachment = Attachment {
            id: self.allocate_id(),
            session_id: new.session_id,
            user_id: new.user_id,
            exchange_id: None,
            file_name: new.file_name,
            mime_type: new.mime_type,
            storage_key: new.storage_key,
            size_bytes: new.size_bytes,
            status: AttachmentStatus::Uploaded,
            created_at: self.now(),
        };
        let id = attachment.id;
        self.attachments.insert(id, attachment);
        Ok(id)
    }

    async fn link_attachments(
        &self,
        exchange_id: ExchangeId,
        ids: &[AttachmentId],
    ) -> StorageResult<()> {
        for id in ids {
            let mut attachment = self
                .attachments
                .get_mut(id)
                .ok_or_else(|| StorageError::not_found("attachment", id))?;
            attachment.exchange_id = Some(exchange_id);
            attachment.status = AttachmentStatus::Linked;
        }
        Ok(())
    }

    async fn get_attachments(&self, ids: &[AttachmentId]) -> StorageResult<Vec<Attachment>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.attachments.get(id).map(|a| a.clone()))
            .collect())
    }

    async fn delete_attachments_before(&self, cutoff: DateTime<Utc>) -> StorageResult<Vec<String>> {
        let expired: Vec<AttachmentId> = self
            .attachments
            .iter()
            .filter(|a| a.created_at < cutoff)
            .map(|a| a.id)
            .collect();

        Ok(expired
            .into_iter()
            .filter_map(|id| self.attachments.remove(&id))
            .map(|(_, attachment)| attachment.storage_key)
            .collect())
    }
}
