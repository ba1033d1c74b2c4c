//! Fan-out of the tool calls requested by one thought step.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{ReasoningBackend, ToolCall};
use crate::exchange::{Event, EventSink};

/// Result of one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub tool_name: String,
    pub result: Result<String, String>,
}

impl ToolOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs every call of a step concurrently and joins them before returning.
#[derive(Clone)]
pub struct ToolDispatcher {
    backend: Arc<dyn ReasoningBackend>,
}

impl ToolDispatcher {
    pub fn new(backend: Arc<dyn ReasoningBackend>) -> Self {
        Self { backend }
    }

    /// Execute `calls` in parallel.
    ///
    /// Each task emits `tool_call` when it starts and `tool_output` or
    /// `tool_error` when it finishes, so events of different calls interleave
    /// freely. The returned outcomes are ordered by tool name (then by
    /// position in the step) regardless of completion order. A panicked task
    /// is logged and contributes no outcome.
    pub async fn dispatch(
        &self,
        calls: &[ToolCall],
        sink: &Arc<dyn EventSink>,
        cancel: &CancellationToken,
    ) -> Vec<ToolOutcome> {
        let mut tasks = JoinSet::new();

        for (index, call) in calls.iter().cloned().enumerate() {
            let backend = self.backend.clone();
            let sink = sink.clone();
            let cancel = cancel.clone();

            tasks.spawn(async move {
                sink.emit(Event::tool_call(&call)).await;
                debug!(tool = %call.tool_name, "Dispatching tool");

                let result = tokio::select! {
                    _ = cancel.cancelled() => Err("cancelled".to_string()),
                    r = backend.execute_tool(&call.tool_name, &call.tool_query) => {
                        r.map_err(|e| e.to_string())
                    }
                };

                match &result {
                    Ok(output) => sink.emit(Event::tool_output(&call.tool_name, output)).await,
                    Err(error) => {
                        warn!(tool = %call.tool_name, error = %error, "Tool call failed");
                        sink.emit(Event::tool_error(&call.tool_name, error)).await;
                    }
                }

                (
                    index,
                    ToolOutcome {
                        tool_name: call.tool_name,
                        result,
                    },
                )
            });
        }

        let mut outcomes = Vec::with_capacity(calls.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(error = %e, "Tool task did not complete"),
            }
        }

        outcomes.sort_by(|(ia, a), (ib, b)| a.tool_name.cmp(&b.tool_name).then(ia.cmp(ib)));
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }
}
