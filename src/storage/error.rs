//! Storage layer error types
//!
//! Errors raised by a storage handle or a transaction handle. Backends other
//! than the bundled Git store report through [`StorageError::Backend`].

use std::path::PathBuf;

use thiserror::Error;

use crate::context::ContextError;
use crate::storage::git::InvalidNameError;

/// the main error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// error from the underlying Git library
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// the context was done before the operation started
    #[error("{0}")]
    Context(#[from] ContextError),

    /// the transaction was already committed or rolled back
    #[error("transaction {0} is no longer active")]
    TransactionClosed(String),

    /// write attempted through a read-only transaction
    #[error("transaction {0} is read-only")]
    ReadOnly(String),

    /// branch update failed due to concurrent modification
    #[error("concurrent modification: branch {branch} was updated by another transaction")]
    ConcurrentModification { branch: String },

    /// the specified branch/ref was not found
    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// invalid collection name or document key
    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// document content is not a JSON object
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// data integrity check failed
    #[error("corrupted data at {path}: {reason}")]
    CorruptedData { path: PathBuf, reason: String },

    /// repo is not initialized
    #[error("repository not initialized: {0}")]
    NotInitialized(PathBuf),

    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// failure reported by a storage backend
    #[error("storage backend error: {0}")]
    Backend(String),

    /// internal error that shouldn't happen
    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Wrap an arbitrary backend failure.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// check if this error is a conflict with another transaction
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::ConcurrentModification { .. })
    }

    /// check if this error is recoverable by retrying the whole operation
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::ConcurrentModification { .. } | StorageError::Context(ContextError::DeadlineExceeded)
        )
    }
}

/// result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
