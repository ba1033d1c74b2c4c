//! Error types for durable and blob storage.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    // ========================================================================
    // Blob backend errors
    // ========================================================================
    /// I/O error during blob file operations.
    #[error("I/O error at {path}: {source}")]
    BlobIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Blob key would escape the blob root.
    #[error("invalid blob key: {0}")]
    InvalidKey(String),

    // ========================================================================
    // Generic errors (any backend)
    // ========================================================================
    /// Error serializing data.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Entity not found.
    #[error("{entity_type} not found: {id}")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    /// Backend rejected the operation.
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Create a blob I/O error with path context.
    pub fn blob_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::BlobIo {
            path: path.into(),
            source,
        }
    }

    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Create a not found error.
    pub fn not_found(entity_type: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity_type,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Convenience type alias for storage results.
pub type StorageResult<T> = Result<T, StorageError>;
