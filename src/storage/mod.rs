//! Storage abstraction consumed by the unit of work.
//!
//! The unit of work never talks to a database directly. It needs exactly two
//! capabilities:
//!
//! ```text
//! ┌──────────────────────┐  begin_transaction(ctx, opts)  ┌────────────────────────┐
//! │   Storage (handle)   │ ─────────────────────────────▶ │  StorageTransaction    │
//! │  pool / repository   │                                │  commit() / rollback() │
//! └──────────────────────┘                                └────────────────────────┘
//! ```
//!
//! [`git::GitStore`] is the bundled implementation: every transaction is a
//! `tx/{ulid}` branch that is fast-forwarded onto `main` on commit and
//! deleted on rollback.

mod error;
pub mod git;
mod isolation;

use serde::{Deserialize, Serialize};

use crate::context::Context;

pub use error::{StorageError, StorageResult};
pub use isolation::IsolationLevel;

/// Options passed to [`Storage::begin_transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TxOptions {
    /// Isolation level for the transaction.
    pub isolation: IsolationLevel,
    /// Reject writes made through the transaction.
    pub read_only: bool,
}

impl TxOptions {
    /// Options with the given isolation level.
    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    /// Set the read-only flag.
    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }
}

/// A storage handle that can open transactions.
///
/// The handle is externally owned; the unit of work keeps a shared reference
/// and uses it for nothing but `begin_transaction`.
pub trait Storage: Send + Sync {
    /// Handle to one open transaction.
    type Transaction: StorageTransaction;

    /// Open a transaction. Implementations should fail with
    /// [`StorageError::Context`] if `ctx` is already done.
    fn begin_transaction(
        &self,
        ctx: &Context,
        options: &TxOptions,
    ) -> StorageResult<Self::Transaction>;
}

/// An open transaction.
///
/// Handles are cheap to clone: repositories keep their own clone, and every
/// clone refers to the same underlying transaction. After `commit` or
/// `rollback` succeeds the handle is inert.
pub trait StorageTransaction: Clone + Send + Sync + 'static {
    /// Identifier used to correlate log events.
    fn id(&self) -> &str;

    /// Make the transaction's writes durable.
    fn commit(&self) -> StorageResult<()>;

    /// Discard the transaction's writes.
    fn rollback(&self) -> StorageResult<()>;
}
