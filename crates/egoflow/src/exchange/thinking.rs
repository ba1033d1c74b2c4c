//! The bounded reasoning loop.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{FileData, ReasoningBackend, ReasoningRequest, ThoughtStep, Usage};
use crate::store::TokenUsage;
use crate::tools::{ToolDispatcher, ToolOutcome};

use super::error::ExchangeError;
use super::events::{Event, EventSink};

/// Hard ceiling on thought steps per exchange.
pub const MAX_THOUGHT_ITERATIONS: usize = 15;

/// One record of the running thought history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryEntry {
    Thought { content: ThoughtStep },
    SystemError { error: String },
    ToolOutput { tool_name: String, output: String },
    ToolError { tool_name: String, error: String },
}

impl From<ToolOutcome> for HistoryEntry {
    fn from(outcome: ToolOutcome) -> Self {
        match outcome.result {
            Ok(output) => Self::ToolOutput {
                tool_name: outcome.tool_name,
                output,
            },
            Err(error) => Self::ToolError {
                tool_name: outcome.tool_name,
                error,
            },
        }
    }
}

/// JSON array form sent to the backend and persisted with the exchange.
pub fn serialize_history(history: &[HistoryEntry]) -> serde_json::Value {
    serde_json::to_value(history).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to serialize thought history");
        serde_json::Value::Array(Vec::new())
    })
}

/// Inputs shared by every iteration.
pub struct ThinkingInput<'a> {
    pub query: &'a str,
    pub mode: &'a str,
    pub transcript: &'a str,
    pub custom_instructions: Option<&'a str>,
    pub files: &'a [FileData],
}

#[derive(Debug, Default)]
pub struct ThinkingOutcome {
    pub history: Vec<HistoryEntry>,
    pub usage: TokenUsage,
    pub iterations: usize,
}

/// Drives thought generation until the backend stops asking for more or the
/// iteration ceiling is reached.
pub struct ThinkingLoop<'a> {
    pub backend: &'a dyn ReasoningBackend,
    pub tools: &'a ToolDispatcher,
    pub sink: &'a Arc<dyn EventSink>,
    pub cancel: &'a CancellationToken,
    pub max_iterations: usize,
}

impl ThinkingLoop<'_> {
    /// Failed iterations are recorded as `system_error` entries and the loop
    /// moves on; only cancellation aborts it.
    pub async fn run(&self, input: &ThinkingInput<'_>) -> Result<ThinkingOutcome, ExchangeError> {
        let max = self.max_iterations.clamp(1, MAX_THOUGHT_ITERATIONS);
        let mut outcome = ThinkingOutcome::default();

        for iteration in 1..=max {
            if self.cancel.is_cancelled() {
                return Err(ExchangeError::Cancelled);
            }
            outcome.iterations = iteration;

            let request = ReasoningRequest {
                query: input.query.to_string(),
                mode: input.mode.to_string(),
                chat_history: input.transcript.to_string(),
                thoughts_history: serialize_history(&outcome.history).to_string(),
                custom_instructions: input.custom_instructions.map(str::to_string),
            };

            let response = tokio::select! {
                _ = self.cancel.cancelled() => return Err(ExchangeError::Cancelled),
                r = self.backend.generate_thought(&request, input.files) => r,
            };

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    warn!(iteration, error = %e, "Thought generation failed");
                    outcome.history.push(HistoryEntry::SystemError {
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            if let Some(usage) = &response.usage {
                self.sink.emit(Event::usage_update(usage)).await;
                add_usage(&mut outcome.usage, usage);
            }

            let step = response.thought;
            if !step.header.is_empty() {
                self.sink.emit(Event::thought_header(&step.header)).await;
            }
            let calls = step.tool_calls.clone();
            let more = step.next_thought_needed;
            outcome.history.push(HistoryEntry::Thought { content: step });

            if !calls.is_empty() {
                debug!(iteration, tools = calls.len(), "Dispatching tool calls");
                let results = self.tools.dispatch(&calls, self.sink, self.cancel).await;
                if self.cancel.is_cancelled() {
                    return Err(ExchangeError::Cancelled);
                }
                outcome.history.extend(results.into_iter().map(HistoryEntry::from));
            }

            if !more {
                break;
            }
        }

        info!(
            iterations = outcome.iterations,
            entries = outcome.history.len(),
            "Thinking finished"
        );
        Ok(outcome)
    }
}

pub(crate) fn add_usage(total: &mut TokenUsage, usage: &Usage) {
    total.add(
        usage.prompt_tokens.unwrap_or(0),
        usage.completion_tokens.unwrap_or(0),
        usage.total_tokens.unwrap_or(0),
    );
}
