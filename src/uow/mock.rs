//! Counting, fault-injecting storage for unit-of-work tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::context::Context;
use crate::storage::{Storage, StorageError, StorageResult, StorageTransaction, TxOptions};
use crate::uow::UowError;

#[derive(Debug, Default)]
struct Shared {
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    fail_begin: AtomicBool,
    fail_commit: AtomicBool,
    fail_rollback: AtomicBool,
    committed: Mutex<Vec<String>>,
}

#[derive(Default)]
pub(crate) struct MockStorage {
    shared: Arc<Shared>,
}

impl MockStorage {
    /// A transaction that bypasses `begin_transaction` and its counters.
    pub fn open(&self) -> MockTx {
        MockTx {
            id: format!("mock-{}", ulid::Ulid::new()),
            shared: self.shared.clone(),
            staged: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn begins(&self) -> usize {
        self.shared.begins.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.shared.commits.load(Ordering::SeqCst)
    }

    /// Rollback attempts, including failed ones.
    pub fn rollbacks(&self) -> usize {
        self.shared.rollbacks.load(Ordering::SeqCst)
    }

    pub fn committed(&self) -> Vec<String> {
        self.shared.committed.lock().clone()
    }

    pub fn fail_begin(&self, value: bool) {
        self.shared.fail_begin.store(value, Ordering::SeqCst);
    }

    pub fn fail_commit(&self, value: bool) {
        self.shared.fail_commit.store(value, Ordering::SeqCst);
    }

    pub fn fail_rollback(&self, value: bool) {
        self.shared.fail_rollback.store(value, Ordering::SeqCst);
    }
}

impl Storage for MockStorage {
    type Transaction = MockTx;

    fn begin_transaction(&self, ctx: &Context, _options: &TxOptions) -> StorageResult<MockTx> {
        ctx.check()?;
        if self.shared.fail_begin.load(Ordering::SeqCst) {
            return Err(StorageError::backend("begin refused"));
        }
        self.shared.begins.fetch_add(1, Ordering::SeqCst);
        Ok(self.open())
    }
}

/// Writes are staged until commit.
#[derive(Debug, Clone)]
pub(crate) struct MockTx {
    id: String,
    shared: Arc<Shared>,
    staged: Arc<Mutex<Vec<String>>>,
}

impl MockTx {
    pub fn write(&self, entry: impl Into<String>) {
        self.staged.lock().push(entry.into());
    }
}

impl StorageTransaction for MockTx {
    fn id(&self) -> &str {
        &self.id
    }

    fn commit(&self) -> StorageResult<()> {
        if self.shared.fail_commit.load(Ordering::SeqCst) {
            return Err(StorageError::backend("commit refused"));
        }
        let staged = std::mem::take(&mut *self.staged.lock());
        self.shared.committed.lock().extend(staged);
        self.shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&self) -> StorageResult<()> {
        self.shared.rollbacks.fetch_add(1, Ordering::SeqCst);
        if self.shared.fail_rollback.load(Ordering::SeqCst) {
            return Err(StorageError::backend("rollback refused"));
        }
        self.staged.lock().clear();
        Ok(())
    }
}

/// Repository handed out by test factories.
#[derive(Debug)]
pub(crate) struct Repo {
    pub name: &'static str,
    pub tx: MockTx,
}

impl Repo {
    pub fn record(&self, what: &str) {
        self.tx.write(format!("{}:{}", self.name, what));
    }
}

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error(transparent)]
    Uow(#[from] UowError),

    #[error("insufficient funds")]
    InsufficientFunds,
}
