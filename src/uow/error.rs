//! Unit-of-work error types.

use thiserror::Error;

use crate::context::ContextError;
use crate::storage::StorageError;

/// Result type for unit-of-work operations.
pub type UowResult<T> = Result<T, UowError>;

/// Errors raised by the unit-of-work manager itself.
///
/// Callback errors pass through [`UnitOfWork::with_transaction`] unchanged;
/// only failures of the transaction lifecycle are reported here.
///
/// [`UnitOfWork::with_transaction`]: crate::uow::UnitOfWork::with_transaction
#[derive(Debug, Error)]
pub enum UowError {
    /// The storage handle could not open a transaction.
    #[error("failed to begin transaction: {0}")]
    TransactionBeginFailed(#[source] StorageError),

    /// A transaction is already active on this manager.
    #[error("transaction already started")]
    TransactionAlreadyActive,

    /// No factory is registered under the requested name.
    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    /// Commit failed; the transaction was rolled back.
    #[error("commit failed: {0}")]
    CommitFailed(#[source] StorageError),

    /// Rollback failed. `cause` is what triggered the rollback, if anything.
    #[error("{}", rollback_failed_display(.source, .cause))]
    RollbackFailed {
        source: StorageError,
        cause: Option<String>,
    },

    /// Rollback requested with no open transaction.
    #[error("no transaction to rollback")]
    NoActiveTransaction,

    /// The context was already done when the manager was constructed.
    #[error("{0}")]
    Canceled(#[from] ContextError),
}

fn rollback_failed_display(source: &StorageError, cause: &Option<String>) -> String {
    match cause {
        Some(cause) => format!("rollback failed: {} (rolling back after: {})", source, cause),
        None => format!("rollback failed: {}", source),
    }
}

impl UowError {
    /// Check if running the whole operation again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            UowError::TransactionAlreadyActive => true,
            UowError::CommitFailed(source) | UowError::TransactionBeginFailed(source) => source.is_retryable(),
            _ => false,
        }
    }
}
