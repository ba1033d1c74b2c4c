//! Streamed synthesis of the final answer.

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{BackendError, FileData, ReasoningBackend, ReasoningRequest, StreamFrame, Usage};
use crate::store::TokenUsage;

use super::error::ExchangeError;
use super::events::{Event, EventSink};
use super::thinking::add_usage;

#[derive(Debug, Default)]
pub struct SynthesisOutcome {
    /// Concatenated text of every `chunk` frame.
    pub response: String,
    pub usage: TokenUsage,
    pub frames: usize,
}

/// Consume the synthesis stream, forwarding frames to `sink`.
///
/// An upstream `error` frame fails the synthesis and an upstream `done` frame
/// ends it; neither is forwarded, so the caller stays the only source of
/// terminal events.
pub async fn synthesize(
    backend: &dyn ReasoningBackend,
    request: &ReasoningRequest,
    files: &[FileData],
    sink: &Arc<dyn EventSink>,
    cancel: &CancellationToken,
) -> Result<SynthesisOutcome, ExchangeError> {
    let mut stream = tokio::select! {
        _ = cancel.cancelled() => return Err(ExchangeError::Cancelled),
        r = backend.synthesize_stream(request, files) => r?,
    };

    let mut outcome = SynthesisOutcome::default();
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(ExchangeError::Cancelled),
            next = stream.next() => next,
        };
        let Some(frame) = next else {
            break;
        };
        let frame = frame?;
        outcome.frames += 1;

        match frame.kind.as_str() {
            StreamFrame::ERROR => {
                let message = frame.error_message();
                warn!(error = %message, "Backend reported synthesis failure");
                return Err(BackendError::Upstream(message).into());
            }
            StreamFrame::DONE => break,
            StreamFrame::CHUNK => {
                if let Some(text) = frame.chunk_text() {
                    outcome.response.push_str(text);
                }
            }
            StreamFrame::USAGE => match serde_json::from_value::<Usage>(frame.data.clone()) {
                Ok(usage) => add_usage(&mut outcome.usage, &usage),
                Err(e) => debug!(error = %e, "Ignoring unreadable usage frame"),
            },
            _ => {}
        }
        sink.emit(Event::frame(frame)).await;
    }

    debug!(
        frames = outcome.frames,
        chars = outcome.response.chars().count(),
        "Synthesis finished"
    );
    Ok(outcome)
}
