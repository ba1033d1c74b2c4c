//! Common test utilities.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::Router;
use chrono::{DateTime, Utc};
use axum::extract::connect_info::MockConnectInfo;
use futures::stream;
use serde_json::json;

use egoflow::backend::{
    BackendError, FileData, FrameStream, ReasoningBackend, ReasoningRequest, StreamFrame,
    ThoughtResponse, ThoughtStep, ToolCall,
};
use egoflow::config::{ConnectionConfig, OrchestratorConfig};
use egoflow::connection::ConnectionRegistry;
use egoflow::exchange::{Event, EventSink, Orchestrator};
use egoflow::server::{self, AppState};
use egoflow::store::{
    Attachment, AttachmentId, DurableStore, Exchange, ExchangeId, ExchangeResult,
    MemoryBlobStore, MemoryStore, NewAttachment, NewExchange, NewSession, Session, SessionId,
    StorageError, StorageResult, UserId,
};

/// A thought step that ends the thinking loop.
pub fn final_thought(header: &str) -> ThoughtResponse {
    ThoughtResponse {
        thought: ThoughtStep {
            thoughts: format!("thinking about {header}"),
            header: header.to_string(),
            next_thought_needed: false,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// A thought step that asks for another iteration.
pub fn continuing_thought(header: &str, tool_calls: Vec<ToolCall>) -> ThoughtResponse {
    ThoughtResponse {
        thought: ThoughtStep {
            thoughts: format!("thinking about {header}"),
            header: header.to_string(),
            tool_calls,
            next_thought_needed: true,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn chunk(text: &str) -> StreamFrame {
    StreamFrame {
        kind: StreamFrame::CHUNK.to_string(),
        data: json!({ "text": text }),
    }
}

pub fn frame(kind: &str, data: serde_json::Value) -> StreamFrame {
    StreamFrame {
        kind: kind.to_string(),
        data,
    }
}

/// Backend that replays scripted responses and records what it was sent.
pub struct ScriptedBackend {
    thoughts: Mutex<VecDeque<Result<ThoughtResponse, BackendError>>>,
    repeat_thought: Mutex<Option<ThoughtResponse>>,
    frames: Mutex<Vec<StreamFrame>>,
    tools: Mutex<HashMap<String, (Duration, Result<String, String>)>>,
    thought_requests: Mutex<Vec<ReasoningRequest>>,
    synthesis_requests: Mutex<Vec<ReasoningRequest>>,
    thought_files: Mutex<Vec<Vec<String>>>,
    thought_delay: Mutex<Duration>,
    thought_starts: Mutex<Vec<(String, Instant)>>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self {
            thoughts: Mutex::new(VecDeque::new()),
            repeat_thought: Mutex::new(None),
            frames: Mutex::new(vec![
                chunk("Hello"),
                chunk(" there"),
                frame(StreamFrame::DONE, json!({})),
            ]),
            tools: Mutex::new(HashMap::new()),
            thought_requests: Mutex::new(Vec::new()),
            synthesis_requests: Mutex::new(Vec::new()),
            thought_files: Mutex::new(Vec::new()),
            thought_delay: Mutex::new(Duration::ZERO),
            thought_starts: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_thought(&self, response: ThoughtResponse) {
        self.thoughts.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_thought_error(&self, error: BackendError) {
        self.thoughts.lock().unwrap().push_back(Err(error));
    }

    /// Answer every unscripted thought request with `response`.
    pub fn repeat_thought(&self, response: ThoughtResponse) {
        *self.repeat_thought.lock().unwrap() = Some(response);
    }

    pub fn set_frames(&self, frames: Vec<StreamFrame>) {
        *self.frames.lock().unwrap() = frames;
    }

    pub fn set_tool(&self, name: &str, delay: Duration, result: Result<&str, &str>) {
        let result = result.map(str::to_string).map_err(str::to_string);
        self.tools
            .lock()
            .unwrap()
            .insert(name.to_string(), (delay, result));
    }

    pub fn set_thought_delay(&self, delay: Duration) {
        *self.thought_delay.lock().unwrap() = delay;
    }

    pub fn thought_requests(&self) -> Vec<ReasoningRequest> {
        self.thought_requests.lock().unwrap().clone()
    }

    pub fn synthesis_requests(&self) -> Vec<ReasoningRequest> {
        self.synthesis_requests.lock().unwrap().clone()
    }

    /// When the first thought request for `query` arrived.
    pub fn first_thought_at(&self, query: &str) -> Option<Instant> {
        self.thought_starts
            .lock()
            .unwrap()
            .iter()
            .find(|(q, _)| q == query)
            .map(|(_, at)| *at)
    }

    /// File names sent with each thought request.
    pub fn thought_files(&self) -> Vec<Vec<String>> {
        self.thought_files.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReasoningBackend for ScriptedBackend {
    async fn generate_thought(
        &self,
        request: &ReasoningRequest,
        files: &[FileData],
    ) -> Result<ThoughtResponse, BackendError> {
        self.thought_starts
            .lock()
            .unwrap()
            .push((request.query.clone(), Instant::now()));
        self.thought_requests.lock().unwrap().push(request.clone());
        self.thought_files
            .lock()
            .unwrap()
            .push(files.iter().map(|f| f.name.clone()).collect());

        let delay = *self.thought_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.thoughts.lock().unwrap().pop_front();
        match scripted {
            Some(result) => result,
            None => Ok(self
                .repeat_thought
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| final_thought("Answering"))),
        }
    }

    async fn synthesize_stream(
        &self,
        request: &ReasoningRequest,
        _files: &[FileData],
    ) -> Result<FrameStream, BackendError> {
        self.synthesis_requests.lock().unwrap().push(request.clone());
        let frames = self.frames.lock().unwrap().clone();
        Ok(Box::pin(stream::iter(frames.into_iter().map(Ok))))
    }

    async fn execute_tool(&self, tool_name: &str, _query: &str) -> Result<String, BackendError> {
        let scripted = self.tools.lock().unwrap().get(tool_name).cloned();
        let (delay, result) = scripted.unwrap_or((Duration::ZERO, Ok(format!("{tool_name} ok"))));
        tokio::time::sleep(delay).await;
        result.map_err(BackendError::Upstream)
    }
}

/// Sink that keeps every event in emission order.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(Event, Instant)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(e, _)| e.clone())
            .collect()
    }

    pub fn kinds(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.kind).collect()
    }

    pub fn of_kind(&self, kind: &str) -> Vec<Event> {
        self.events().into_iter().filter(|e| e.kind == kind).collect()
    }

    pub fn terminal_count(&self) -> usize {
        self.events().iter().filter(|e| e.is_terminal()).count()
    }

    /// When the first event of `kind` was emitted.
    pub fn time_of(&self, kind: &str) -> Option<Instant> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .find(|(e, _)| e.kind == kind)
            .map(|(_, at)| *at)
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn emit(&self, event: Event) {
        self.events.lock().unwrap().push((event, Instant::now()));
    }
}

/// Durable store whose writes can be made to fail on demand.
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    pub fail_attachments: AtomicBool,
    pub fail_inserts: AtomicBool,
    pub fail_updates: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_attachments: AtomicBool::new(false),
            fail_inserts: AtomicBool::new(false),
            fail_updates: AtomicBool::new(false),
        })
    }

    fn check(flag: &AtomicBool, what: &str) -> StorageResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(format!("{what} rejected")));
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for FlakyStore {
    async fn resolve_session(
        &self,
        id: Option<SessionId>,
        new: NewSession,
    ) -> StorageResult<(Session, bool)> {
        self.inner.resolve_session(id, new).await
    }

    async fn get_session(&self, id: SessionId, user_id: UserId) -> StorageResult<Option<Session>> {
        self.inner.get_session(id, user_id).await
    }

    async fn rename_session(&self, id: SessionId, user_id: UserId, title: &str) -> StorageResult<()> {
        self.inner.rename_session(id, user_id, title).await
    }

    async fn update_session_instructions(
        &self,
        id: SessionId,
        user_id: UserId,
        instructions: &str,
    ) -> StorageResult<()> {
        self.inner
            .update_session_instructions(id, user_id, instructions)
            .await
    }

    async fn get_exchange(&self, id: ExchangeId, user_id: UserId) -> StorageResult<Option<Exchange>> {
        self.inner.get_exchange(id, user_id).await
    }

    async fn recent_exchanges(
        &self,
        session_id: SessionId,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> StorageResult<Vec<Exchange>> {
        self.inner.recent_exchanges(session_id, before, limit).await
    }

    async fn insert_exchange(&self, new: NewExchange) -> StorageResult<ExchangeId> {
        Self::check(&self.fail_inserts, "insert")?;
        self.inner.insert_exchange(new).await
    }

    async fn update_exchange_result(&self, id: ExchangeId, result: ExchangeResult) -> StorageResult<()> {
        Self::check(&self.fail_updates, "update")?;
        self.inner.update_exchange_result(id, result).await
    }

    async fn create_attachment(&self, new: NewAttachment) -> StorageResult<AttachmentId> {
        Self::check(&self.fail_attachments, "attachment")?;
        self.inner.create_attachment(new).await
    }

    async fn link_attachments(&self, exchange_id: ExchangeId, ids: &[AttachmentId]) -> StorageResult<()> {
        self.inner.link_attachments(exchange_id, ids).await
    }

    async fn get_attachments(&self, ids: &[AttachmentId]) -> StorageResult<Vec<Attachment>> {
        self.inner.get_attachments(ids).await
    }

    async fn delete_attachments_before(&self, cutoff: DateTime<Utc>) -> StorageResult<Vec<String>> {
        self.inner.delete_attachments_before(cutoff).await
    }
}

/// Orchestrator wired to in-memory stores.
pub struct Harness {
    pub backend: Arc<ScriptedBackend>,
    pub store: Arc<MemoryStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub orchestrator: Arc<Orchestrator>,
}

pub fn harness() -> Harness {
    harness_with(OrchestratorConfig::default())
}

pub fn harness_with(config: OrchestratorConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    build_harness(config, store.clone(), store)
}

/// Harness whose orchestrator writes through a [`FlakyStore`]; `store` still
/// exposes the underlying records.
pub fn flaky_harness() -> (Harness, Arc<FlakyStore>) {
    let store = Arc::new(MemoryStore::new());
    let flaky = FlakyStore::new(store.clone());
    let harness = build_harness(OrchestratorConfig::default(), store, flaky.clone());
    (harness, flaky)
}

fn build_harness(
    config: OrchestratorConfig,
    store: Arc<MemoryStore>,
    durable: Arc<dyn DurableStore>,
) -> Harness {
    let backend = ScriptedBackend::new();
    let blobs = Arc::new(MemoryBlobStore::new());
    let orchestrator = Arc::new(Orchestrator::new(
        backend.clone(),
        durable,
        blobs.clone(),
        config,
    ));
    Harness {
        backend,
        store,
        blobs,
        orchestrator,
    }
}

/// Create a test `AppState` around a harness.
pub fn test_app_state(harness: &Harness) -> AppState {
    let (registry, _task) = ConnectionRegistry::spawn();
    AppState {
        orchestrator: harness.orchestrator.clone(),
        registry,
        connection: ConnectionConfig::default(),
        api_token: None,
        keep_alive_interval_seconds: 15,
        max_connections: 64,
    }
}

/// Create a test app whose requests appear to come from loopback.
pub fn test_app(harness: &Harness) -> Router {
    server::build_app(test_app_state(harness), 300)
        .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))))
}
