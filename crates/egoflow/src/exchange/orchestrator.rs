//! Per-exchange state machine.
//!
//! ```text
//! SessionResolution -> AttachmentIngestion -> HistoryAssembly
//!     -> ThinkingLoop (<= 15) -> Synthesis -> Persistence -> done | error
//! ```
//!
//! Every call to [`Orchestrator::process`] emits exactly one terminal event.
//! Exchanges on the same session are serialized; exchanges on different
//! sessions run concurrently.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::{FileData, ReasoningBackend, ReasoningRequest};
use crate::config::OrchestratorConfig;
use crate::store::{
    AttachmentId, BlobStore, DurableStore, Exchange, ExchangeId, ExchangeResult, NewExchange,
    NewSession, Session, SessionId, TokenUsage, UserId,
};
use crate::sync::{KeyedGuard, KeyedLocks};
use crate::tools::ToolDispatcher;

use super::error::ExchangeError;
use super::events::{Event, EventSink};
use super::history;
use super::ingest;
use super::request::ConversationRequest;
use super::synthesis;
use super::thinking::{ThinkingInput, ThinkingLoop, serialize_history};
use super::title::{FALLBACK_TITLE, derive_title};

/// What a finished exchange produced.
#[derive(Debug, Clone)]
pub struct ExchangeSummary {
    pub session_id: SessionId,
    /// Persisted (or regenerated) exchange; `None` when the insert failed.
    pub exchange_id: Option<ExchangeId>,
    pub response: String,
    pub iterations: usize,
    pub usage: TokenUsage,
}

/// Everything resolved before the reasoning phases start.
struct Prepared {
    session: Session,
    query: String,
    mode: String,
    files: Vec<FileData>,
    attachment_ids: Vec<AttachmentId>,
    history_before: Option<DateTime<Utc>>,
    regenerating: Option<ExchangeId>,
    session_guard: KeyedGuard<SessionId>,
}

/// Drives conversation exchanges against the reasoning backend and stores.
pub struct Orchestrator {
    backend: Arc<dyn ReasoningBackend>,
    tools: ToolDispatcher,
    store: Arc<dyn DurableStore>,
    blobs: Arc<dyn BlobStore>,
    config: OrchestratorConfig,
    session_locks: KeyedLocks<SessionId>,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn ReasoningBackend>,
        store: Arc<dyn DurableStore>,
        blobs: Arc<dyn BlobStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            tools: ToolDispatcher::new(backend.clone()),
            backend,
            store,
            blobs,
            config,
            session_locks: KeyedLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    /// Run one exchange to completion, ending with `done` or `error`.
    pub async fn process(
        &self,
        request: ConversationRequest,
        user_id: UserId,
        sink: Arc<dyn EventSink>,
        cancel: CancellationToken,
    ) -> Result<ExchangeSummary, ExchangeError> {
        // Released only after the terminal event is out.
        let mut session_guard = None;
        let result = self
            .run(&request, user_id, &sink, &cancel, &mut session_guard)
            .await;

        match &result {
            Ok(summary) => {
                info!(
                    session_id = summary.session_id,
                    exchange_id = ?summary.exchange_id,
                    iterations = summary.iterations,
                    "Exchange completed"
                );
                sink.emit(Event::done()).await;
            }
            Err(ExchangeError::Cancelled) => {
                info!(user_id, "Exchange cancelled");
                sink.emit(Event::error(ExchangeError::Cancelled.to_string()))
                    .await;
            }
            Err(e) => {
                warn!(user_id, error = %e, "Exchange failed");
                sink.emit(Event::error(e.to_string())).await;
            }
        }
        drop(session_guard);
        result
    }

    async fn run(
        &self,
        request: &ConversationRequest,
        user_id: UserId,
        sink: &Arc<dyn EventSink>,
        cancel: &CancellationToken,
        session_guard: &mut Option<KeyedGuard<SessionId>>,
    ) -> Result<ExchangeSummary, ExchangeError> {
        let prepared = match request.regeneration_target()? {
            Some(target) => self.prepare_regeneration(request, target, user_id).await?,
            None => self.prepare_fresh(request, user_id, sink).await?,
        };
        *session_guard = Some(prepared.session_guard);
        ensure_active(cancel)?;

        let assembled = history::assemble(
            self.store.as_ref(),
            self.blobs.as_ref(),
            prepared.session.id,
            prepared.history_before,
            self.config.history_limit,
            prepared.files,
        )
        .await?;
        ensure_active(cancel)?;

        sink.emit(Event::status("thinking")).await;
        let instructions = prepared.session.custom_instructions.as_deref();
        let thinking = ThinkingLoop {
            backend: self.backend.as_ref(),
            tools: &self.tools,
            sink,
            cancel,
            max_iterations: self.config.max_thoughts,
        }
        .run(&ThinkingInput {
            query: &prepared.query,
            mode: &prepared.mode,
            transcript: &assembled.transcript,
            custom_instructions: instructions,
            files: &assembled.files,
        })
        .await?;

        let thoughts = serialize_history(&thinking.history);
        sink.emit(Event::status("synthesizing")).await;
        let synthesis_request = ReasoningRequest {
            query: prepared.query.clone(),
            mode: prepared.mode.clone(),
            chat_history: assembled.transcript,
            thoughts_history: thoughts.to_string(),
            custom_instructions: instructions.map(str::to_string),
        };
        let synthesized = synthesis::synthesize(
            self.backend.as_ref(),
            &synthesis_request,
            &assembled.files,
            sink,
            cancel,
        )
        .await?;
        ensure_active(cancel)?;

        let mut usage = thinking.usage;
        usage.add(
            synthesized.usage.prompt_tokens,
            synthesized.usage.completion_tokens,
            synthesized.usage.total_tokens,
        );

        let exchange_id = match prepared.regenerating {
            Some(id) => {
                let result = ExchangeResult {
                    thoughts,
                    final_response: synthesized.response.clone(),
                };
                match self.store.update_exchange_result(id, result).await {
                    Ok(()) => {
                        debug!(exchange_id = id, "Regenerated exchange updated");
                        Some(id)
                    }
                    Err(e) => {
                        error!(exchange_id = id, error = %e, "Failed to update regenerated exchange");
                        None
                    }
                }
            }
            None => {
                let new = NewExchange {
                    token: Uuid::new_v4().to_string(),
                    session_id: prepared.session.id,
                    user_id,
                    query: prepared.query.clone(),
                    mode: prepared.mode.clone(),
                    thoughts,
                    final_response: synthesized.response.clone(),
                    attachment_ids: prepared.attachment_ids.clone(),
                    usage,
                };
                self.persist(new, &prepared.attachment_ids, request.temp_id, sink)
                    .await
            }
        };

        Ok(ExchangeSummary {
            session_id: prepared.session.id,
            exchange_id,
            response: synthesized.response,
            iterations: thinking.iterations,
            usage,
        })
    }

    async fn prepare_fresh(
        &self,
        request: &ConversationRequest,
        user_id: UserId,
        sink: &Arc<dyn EventSink>,
    ) -> Result<Prepared, ExchangeError> {
        if request.query.trim().is_empty() && request.files.is_empty() {
            return Err(ExchangeError::InvalidRequest(
                "query or files required".to_string(),
            ));
        }

        let file_names: Vec<&str> = request.files.iter().map(|f| f.file_name.as_str()).collect();
        let title = derive_title(&request.query, &file_names, self.config.title_max_chars);
        let mode = request.mode_or_default().to_string();

        let (mut session, created) = self
            .store
            .resolve_session(
                request.session_id,
                NewSession {
                    user_id,
                    title: title.clone(),
                    mode: mode.clone(),
                },
            )
            .await
            .map_err(ExchangeError::Session)?;

        // Keyed by the resolved id: a foreign id has become a fresh session.
        let guard = self.session_locks.lock(session.id).await;

        if created {
            if let Some(instructions) = request.instructions() {
                match self
                    .store
                    .update_session_instructions(session.id, user_id, instructions)
                    .await
                {
                    Ok(()) => session.custom_instructions = Some(instructions.to_string()),
                    Err(e) => {
                        warn!(session_id = session.id, error = %e, "Failed to store custom instructions")
                    }
                }
            }
            info!(session_id = session.id, user_id, "Session created");
            sink.emit(Event::session_created(&session)).await;
        } else if session.title == FALLBACK_TITLE && title != FALLBACK_TITLE {
            match self.store.rename_session(session.id, user_id, &title).await {
                Ok(()) => session.title = title,
                Err(e) => warn!(session_id = session.id, error = %e, "Failed to rename session"),
            }
        }

        let ingested = ingest::ingest_files(
            self.store.as_ref(),
            self.blobs.as_ref(),
            session.id,
            user_id,
            &request.files,
        )
        .await;

        Ok(Prepared {
            session,
            query: request.query.clone(),
            mode,
            files: ingested.files,
            attachment_ids: ingested.attachment_ids,
            history_before: None,
            regenerating: None,
            session_guard: guard,
        })
    }

    async fn prepare_regeneration(
        &self,
        request: &ConversationRequest,
        target_id: ExchangeId,
        user_id: UserId,
    ) -> Result<Prepared, ExchangeError> {
        let target = self
            .store
            .get_exchange(target_id, user_id)
            .await
            .map_err(ExchangeError::Session)?
            .ok_or(ExchangeError::RegenerationTargetNotFound(target_id))?;

        let guard = self.session_locks.lock(target.session_id).await;

        let session = self
            .store
            .get_session(target.session_id, user_id)
            .await
            .map_err(ExchangeError::Session)?
            .ok_or(ExchangeError::SessionNotFound(target.session_id))?;

        info!(
            exchange_id = target.id,
            session_id = session.id,
            "Regenerating exchange"
        );
        let files = self.original_files(&target).await;
        let mode = if request.mode.trim().is_empty() {
            target.mode.clone()
        } else {
            request.mode_or_default().to_string()
        };

        Ok(Prepared {
            session,
            query: target.query,
            mode,
            files,
            attachment_ids: target.attachment_ids,
            history_before: Some(target.created_at),
            regenerating: Some(target.id),
            session_guard: guard,
        })
    }

    /// Files attached to the exchange being regenerated.
    async fn original_files(&self, target: &Exchange) -> Vec<FileData> {
        if target.attachment_ids.is_empty() {
            return Vec::new();
        }
        let attachments = match self.store.get_attachments(&target.attachment_ids).await {
            Ok(attachments) => attachments,
            Err(e) => {
                warn!(exchange_id = target.id, error = %e, "Failed to load original attachments");
                return Vec::new();
            }
        };

        let mut files = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            match self.blobs.get(&attachment.storage_key).await {
                Ok(bytes) => files.push(FileData {
                    name: attachment.file_name,
                    mime_type: attachment.mime_type,
                    bytes,
                }),
                Err(e) => {
                    warn!(key = %attachment.storage_key, error = %e, "Failed to load original file")
                }
            }
        }
        files
    }

    /// Insert the exchange, link its attachments and announce it.
    ///
    /// Failures are logged only; the exchange still completes with `done`.
    async fn persist(
        &self,
        new: NewExchange,
        attachment_ids: &[AttachmentId],
        temp_id: Option<i64>,
        sink: &Arc<dyn EventSink>,
    ) -> Option<ExchangeId> {
        let session_id = new.session_id;
        let id = match self.store.insert_exchange(new).await {
            Ok(id) => id,
            Err(e) => {
                error!(session_id, error = %e, "Failed to persist exchange");
                return None;
            }
        };

        if !attachment_ids.is_empty()
            && let Err(e) = self.store.link_attachments(id, attachment_ids).await
        {
            error!(exchange_id = id, error = %e, "Failed to link attachments");
        }

        sink.emit(Event::log_saved(temp_id, id)).await;
        Some(id)
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<(), ExchangeError> {
    if cancel.is_cancelled() {
        Err(ExchangeError::Cancelled)
    } else {
        Ok(())
    }
}
