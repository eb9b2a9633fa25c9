//! The unit-of-work manager.
//!
//! A [`UnitOfWork`] binds one storage handle to a set of named repository
//! factories and runs business operations inside a single transaction:
//!
//! ```text
//! with_transaction(ctx, f)
//!   reserve ─▶ begin ─▶ f(&uow) ─┬─ Ok  ─▶ commit ──┬─ ok ───────────────▶ Ok(v)
//!                                │                  └─ err ─▶ rollback ──▶ CommitFailed
//!                                └─ Err ─▶ rollback ─────────────────────▶ Err(e)
//! ```
//!
//! Repositories fetched with [`get_repository`](UnitOfWork::get_repository)
//! inside `f` are bound to that same transaction. Outside `f` the first call
//! begins a transaction lazily, which stays open until
//! [`commit_or_rollback`](UnitOfWork::commit_or_rollback) or
//! [`rollback`](UnitOfWork::rollback).

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::config::UowConfig;
use crate::context::Context;
use crate::storage::{Storage, StorageTransaction};
use crate::uow::current;
use crate::uow::error::{UowError, UowResult};
use crate::uow::registry::Registry;
use crate::uow::state::{Claim, SlotGuard, TxSlot};

/// Transaction coordinator for one storage handle.
///
/// `R` is whatever repository type the factories produce, typically an enum
/// over the application's repositories or a boxed trait object.
///
/// At most one transaction is open per manager. Callers that share a manager
/// across threads get [`UowError::TransactionAlreadyActive`] while another
/// thread holds it, unless the config asks them to wait.
pub struct UnitOfWork<S: Storage, R> {
    storage: Arc<S>,
    config: UowConfig,
    registry: Registry<S::Transaction, R>,
    slot: TxSlot<S::Transaction>,
}

impl<S, R> UnitOfWork<S, R>
where
    S: Storage + 'static,
    R: 'static,
{
    /// Create a manager with the default config and make it the process-wide
    /// [`current`](crate::uow::current) manager.
    pub fn new(ctx: &Context, storage: Arc<S>) -> UowResult<Arc<Self>> {
        Self::new_with_config(ctx, storage, UowConfig::default())
    }

    pub fn new_with_config(ctx: &Context, storage: Arc<S>, config: UowConfig) -> UowResult<Arc<Self>> {
        ctx.check()?;

        let uow = Arc::new(Self::standalone(storage, config));
        current::publish(uow.clone());
        debug!(acquire = ?config.acquire, isolation = %config.transaction.isolation, "created unit of work");
        Ok(uow)
    }

    /// Create a manager without publishing it as the current one.
    pub fn standalone(storage: Arc<S>, config: UowConfig) -> Self {
        Self {
            storage,
            config,
            registry: Registry::new(),
            slot: TxSlot::new(),
        }
    }
}

impl<S: Storage, R> UnitOfWork<S, R> {
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn config(&self) -> &UowConfig {
        &self.config
    }

    /// Register a factory under `name`, replacing any previous one.
    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn(&S::Transaction) -> R + Send + Sync + 'static,
    {
        self.registry.register(name.into(), Arc::new(factory));
    }

    /// Remove the factory under `name`. Unknown names are ignored.
    pub fn unregister(&self, name: &str) {
        self.registry.unregister(name);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// Registered names, sorted.
    pub fn repository_names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Whether a transaction is open (or being opened) on this manager.
    pub fn in_transaction(&self) -> bool {
        self.slot.is_active()
    }

    /// Build the repository registered under `name`, bound to the open
    /// transaction.
    ///
    /// With no transaction open, one is begun with `ctx` and stays open until
    /// [`commit_or_rollback`] or [`rollback`] resolves it. Further calls on
    /// the same thread reuse it; other threads cannot fetch repositories
    /// from it but may resolve it.
    ///
    /// [`commit_or_rollback`]: Self::commit_or_rollback
    /// [`rollback`]: Self::rollback
    pub fn get_repository(&self, ctx: &Context, name: &str) -> UowResult<R> {
        let factory = self.registry.lookup(name)?;

        let tx = match self.slot.claim(self.config.acquire, true)? {
            Claim::Joined(tx) => tx,
            Claim::Reserved(guard) => {
                let tx = self.begin(ctx)?;
                guard.activate(tx.clone());
                guard.keep();
                debug!(tx_id = tx.id(), repository = name, "began transaction lazily");
                tx
            }
        };

        Ok(factory(&tx))
    }

    /// Run `f` inside a fresh transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back when it returns `Err` and
    /// hands that error back unchanged. Lifecycle failures are converted into
    /// `E` through `From<UowError>`. A panic in `f` rolls the transaction
    /// back before unwinding further.
    ///
    /// Nesting is not supported: calling this from inside `f` fails with
    /// [`UowError::TransactionAlreadyActive`].
    ///
    /// The context only bounds the begin step; commit and rollback always
    /// run to completion.
    pub fn with_transaction<T, E, F>(&self, ctx: &Context, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<UowError> + fmt::Display,
    {
        let guard = self.slot.reserve(self.config.acquire)?;
        let tx = self.begin(ctx)?;
        guard.activate(tx);

        let outcome = f(self);

        let (guard, tx) = match guard.transaction() {
            Some(tx) => (guard, tx),
            // f resolved the transaction itself, and may have lazily begun
            // another one since; that one is resolved like the first
            None => {
                drop(guard);
                match self.slot.adopt_own() {
                    Ok(adopted) => adopted,
                    Err(_) => return outcome,
                }
            }
        };

        match outcome {
            Ok(value) => {
                self.finish_commit(guard, tx)?;
                Ok(value)
            }
            Err(err) => {
                self.finish_rollback(guard, tx, Some(err.to_string()))?;
                Err(err)
            }
        }
    }

    /// Commit the open transaction and return `outcome`.
    ///
    /// Resolves the transaction the calling thread has open, or one left
    /// open by a lazy [`get_repository`](Self::get_repository) on any thread.
    ///
    /// If the commit fails the transaction is rolled back and the commit
    /// error is returned instead; if that rollback fails too, the error names
    /// both failures. The manager is idle afterwards in every case.
    pub fn commit_or_rollback<T, E>(&self, outcome: Result<T, E>) -> Result<T, E>
    where
        E: From<UowError>,
    {
        let (guard, tx) = self.slot.adopt()?;
        self.finish_commit(guard, tx)?;
        outcome
    }

    /// Roll back the open transaction and return `outcome`.
    ///
    /// Picks the transaction the same way as
    /// [`commit_or_rollback`](Self::commit_or_rollback). Fails with
    /// [`UowError::NoActiveTransaction`] when nothing is open.
    pub fn rollback<T, E>(&self, outcome: Result<T, E>) -> Result<T, E>
    where
        E: From<UowError> + fmt::Display,
    {
        let (guard, tx) = self.slot.adopt()?;
        let cause = outcome.as_ref().err().map(|e| e.to_string());
        self.finish_rollback(guard, tx, cause)?;
        outcome
    }

    fn begin(&self, ctx: &Context) -> UowResult<S::Transaction> {
        ctx.check()
            .map_err(|e| UowError::TransactionBeginFailed(e.into()))?;

        let tx = self
            .storage
            .begin_transaction(ctx, &self.config.transaction)
            .map_err(|e| {
                warn!(error = %e, "failed to begin transaction");
                UowError::TransactionBeginFailed(e)
            })?;

        debug!(tx_id = tx.id(), isolation = %self.config.transaction.isolation, "began transaction");
        Ok(tx)
    }

    fn finish_commit(&self, guard: SlotGuard<'_, S::Transaction>, tx: S::Transaction) -> UowResult<()> {
        let commit_err = match tx.commit() {
            Ok(()) => {
                guard.resolved();
                debug!(tx_id = tx.id(), "committed transaction");
                return Ok(());
            }
            Err(e) => e,
        };

        warn!(tx_id = tx.id(), error = %commit_err, "commit failed, rolling back");
        let rolled_back = tx.rollback();
        guard.resolved();

        match rolled_back {
            Ok(()) => Err(UowError::CommitFailed(commit_err)),
            Err(rollback_err) => {
                let cause = UowError::CommitFailed(commit_err).to_string();
                error!(tx_id = tx.id(), error = %rollback_err, cause = %cause, "rollback after failed commit failed");
                Err(UowError::RollbackFailed {
                    source: rollback_err,
                    cause: Some(cause),
                })
            }
        }
    }

    fn finish_rollback(
        &self,
        guard: SlotGuard<'_, S::Transaction>,
        tx: S::Transaction,
        cause: Option<String>,
    ) -> UowResult<()> {
        let result = tx.rollback();
        guard.resolved();

        match result {
            Ok(()) => {
                debug!(tx_id = tx.id(), "rolled back transaction");
                Ok(())
            }
            Err(e) => {
                error!(tx_id = tx.id(), error = %e, "rollback failed");
                Err(UowError::RollbackFailed { source: e, cause })
            }
        }
    }
}

impl<S: Storage, R> fmt::Debug for UnitOfWork<S, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("config", &self.config)
            .field("repositories", &self.repository_names())
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}
