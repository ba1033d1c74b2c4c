//! Client side of the reasoning backend.
//!
//! The backend exposes three operations: produce one thought step, stream
//! the final synthesis, and execute a named tool. `ReasoningBackend` is the
//! seam the orchestrator talks to; `HttpReasoningBackend` is the production
//! implementation.

mod error;
mod frame;
mod http;
mod types;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

pub use error::BackendError;
pub use frame::{FrameDecoder, MAX_FRAME_BYTES};
pub use http::HttpReasoningBackend;
pub use types::{
    FileData, ReasoningRequest, StreamFrame, ThoughtResponse, ThoughtStep, ToolCall, Usage,
};

/// Stream of decoded synthesis frames.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<StreamFrame, BackendError>> + Send>>;

#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    /// Request one thought step.
    async fn generate_thought(
        &self,
        request: &ReasoningRequest,
        files: &[FileData],
    ) -> Result<ThoughtResponse, BackendError>;

    /// Open the synthesis stream.
    async fn synthesize_stream(
        &self,
        request: &ReasoningRequest,
        files: &[FileData],
    ) -> Result<FrameStream, BackendError>;

    /// Execute a tool and return its textual result.
    async fn execute_tool(&self, tool_name: &str, query: &str) -> Result<String, BackendError>;
}
