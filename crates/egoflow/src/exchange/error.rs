//! Errors that abort an exchange.

use thiserror::Error;

use crate::backend::BackendError;
use crate::store::{ExchangeId, SessionId, StorageError};

/// An unrecoverable exchange failure; rendered as the terminal `error` event.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("exchange {0} not found")]
    RegenerationTargetNotFound(ExchangeId),

    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("failed to resolve session: {0}")]
    Session(#[source] StorageError),

    #[error("failed to load history: {0}")]
    History(#[source] StorageError),

    #[error("synthesis failed: {0}")]
    Synthesis(#[from] BackendError),

    #[error("exchange cancelled")]
    Cancelled,
}

impl ExchangeError {
    /// Failures caused by the request itself rather than a dependency.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest(_) | Self::RegenerationTargetNotFound(_) | Self::SessionNotFound(_)
        )
    }
}
