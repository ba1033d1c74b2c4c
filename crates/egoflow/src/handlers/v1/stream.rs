//! One-shot exchange streamed as server-sent events.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Json;
use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::exchange::{ConversationRequest, Event, EventSink};
use crate::handlers::api_auth::Requester;
use crate::server::AppState;

/// Forwards events into the response body channel.
struct ChannelSink {
    tx: mpsc::Sender<Event>,
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: Event) {
        // A closed channel means the client is gone; the drop guard has
        // already cancelled the exchange.
        let _ = self.tx.send(event).await;
    }
}

/// POST /api/v1/stream/{mode}
///
/// Runs one exchange and streams its events. Every SSE `data` line carries
/// one `{"type": ..., "data": ...}` envelope; the stream ends after `done`
/// or `error`. Disconnecting cancels the exchange.
pub async fn stream_exchange(
    State(state): State<AppState>,
    Requester(user_id): Requester,
    Path(mode): Path<String>,
    Json(mut request): Json<ConversationRequest>,
) -> Response {
    request.mode = mode;

    let (tx, rx) = mpsc::channel(state.connection.outbound_capacity);
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let sink: Arc<dyn EventSink> = Arc::new(ChannelSink { tx });

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        let _ = orchestrator.process(request, user_id, sink, cancel).await;
        debug!(user_id, "Streamed exchange finished");
    });

    let events = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let event = rx.recv().await?;
        let sse = SseEvent::default().data(event.to_json());
        Some((Ok::<_, Infallible>(sse), (rx, guard)))
    });

    let keep_alive = KeepAlive::new()
        .interval(Duration::from_secs(state.keep_alive_interval_seconds))
        .text("keep-alive");

    Sse::new(events).keep_alive(keep_alive).into_response()
}
