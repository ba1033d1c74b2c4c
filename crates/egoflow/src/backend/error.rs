//! Reasoning backend error types.

use thiserror::Error;

/// Errors that can occur when calling the reasoning backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// HTTP request failed
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Backend returned a non-success status
    #[error("backend error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Response body could not be decoded
    #[error("invalid backend response: {0}")]
    Decode(String),

    /// Tool response carried no `result` field
    #[error("tool response missing 'result'")]
    MissingToolResult,

    /// A single stream frame exceeded the buffer limit
    #[error("stream frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },

    /// Backend reported a failure inside the synthesis stream
    #[error("synthesis failed upstream: {0}")]
    Upstream(String),
}

impl From<std::convert::Infallible> for BackendError {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}
