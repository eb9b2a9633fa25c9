//! Idle/Active state of a manager's single transaction.
//!
//! ```text
//!            claim / reserve                 activate
//!   Idle ─────────────────────▶ Beginning ─────────────▶ Active
//!    ▲                              │                      │
//!    └──────── release ─────────────┴──────────────────────┘
//! ```
//!
//! The slot is owned by the thread that claimed it from the moment it leaves
//! `Idle` until it is released, so the exclusive window covers begin, the
//! callback and resolution. Every claim gets a fresh generation; a guard can
//! only release the claim it was created for.
//!
//! A transaction kept open past its guard (lazy begin) is detached: any
//! thread may adopt it to commit or roll it back, so an owner that exits
//! without resolving cannot lock the manager for good.

use std::mem;
use std::thread::{self, ThreadId};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::{error, warn};

use crate::config::AcquirePolicy;
use crate::storage::StorageTransaction;
use crate::uow::error::{UowError, UowResult};

enum Phase<T> {
    Idle,
    /// reserved, `begin_transaction` in progress
    Beginning { owner: ThreadId },
    Active {
        owner: ThreadId,
        tx: T,
        /// kept open past its guard, adoptable from any thread
        detached: bool,
    },
}

struct SlotState<T> {
    phase: Phase<T>,
    generation: u64,
}

impl<T> SlotState<T> {
    fn owner(&self) -> Option<ThreadId> {
        match &self.phase {
            Phase::Idle => None,
            Phase::Beginning { owner } | Phase::Active { owner, .. } => Some(*owner),
        }
    }
}

/// The transaction handle plus the lock that serializes access to it.
pub(crate) struct TxSlot<T> {
    state: Mutex<SlotState<T>>,
    released: Condvar,
}

/// Outcome of [`TxSlot::claim`].
pub(crate) enum Claim<'a, T: StorageTransaction> {
    /// The calling thread already owns an active transaction.
    Joined(T),
    /// The slot was idle and is now reserved for the caller.
    Reserved(SlotGuard<'a, T>),
}

impl<T: StorageTransaction> TxSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                phase: Phase::Idle,
                generation: 0,
            }),
            released: Condvar::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().owner().is_some()
    }

    /// Reserve the idle slot for a fresh transaction.
    pub fn reserve(&self, policy: AcquirePolicy) -> UowResult<SlotGuard<'_, T>> {
        match self.claim(policy, false)? {
            Claim::Reserved(guard) => Ok(guard),
            Claim::Joined(_) => Err(UowError::TransactionAlreadyActive),
        }
    }

    /// Reserve the slot, or with `join` set, reuse the transaction the
    /// calling thread already has open.
    ///
    /// A slot held by another thread fails fast or, under
    /// [`AcquirePolicy::Wait`], blocks until it is released or the timeout
    /// elapses. A slot held by the calling thread never blocks.
    pub fn claim(&self, policy: AcquirePolicy, join: bool) -> UowResult<Claim<'_, T>> {
        let me = thread::current().id();
        let deadline = policy.timeout().map(|timeout| Instant::now() + timeout);
        let mut state = self.state.lock();

        loop {
            match state.owner() {
                None => {
                    state.generation += 1;
                    state.phase = Phase::Beginning { owner: me };
                    return Ok(Claim::Reserved(SlotGuard {
                        slot: self,
                        generation: state.generation,
                        armed: true,
                    }));
                }
                Some(owner) if owner == me => {
                    if let (true, Phase::Active { tx, .. }) = (join, &state.phase) {
                        return Ok(Claim::Joined(tx.clone()));
                    }
                    return Err(UowError::TransactionAlreadyActive);
                }
                Some(_) => match deadline {
                    Some(deadline) if Instant::now() < deadline => {
                        self.released.wait_until(&mut state, deadline);
                    }
                    _ => return Err(UowError::TransactionAlreadyActive),
                },
            }
        }
    }

    /// Take over resolution of the transaction the calling thread has open,
    /// or of a detached one begun by any thread.
    pub fn adopt(&self) -> UowResult<(SlotGuard<'_, T>, T)> {
        self.adopt_where(true)
    }

    /// Like [`adopt`](Self::adopt), but only for the calling thread's own
    /// transaction.
    pub fn adopt_own(&self) -> UowResult<(SlotGuard<'_, T>, T)> {
        self.adopt_where(false)
    }

    fn adopt_where(&self, foreign_detached: bool) -> UowResult<(SlotGuard<'_, T>, T)> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        let generation = state.generation;

        match &mut state.phase {
            Phase::Idle => Err(UowError::NoActiveTransaction),
            Phase::Active { owner, tx, detached } if *owner == me || (foreign_detached && *detached) => {
                // the adopter is now the only one who may resolve it
                *owner = me;
                *detached = false;
                let guard = SlotGuard {
                    slot: self,
                    generation,
                    armed: true,
                };
                Ok((guard, tx.clone()))
            }
            _ => Err(UowError::TransactionAlreadyActive),
        }
    }

    fn activate(&self, generation: u64, tx: T) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        let owner = match state.phase {
            Phase::Beginning { owner } => owner,
            _ => return,
        };
        state.phase = Phase::Active {
            owner,
            tx,
            detached: false,
        };
    }

    fn detach(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        if let Phase::Active { detached, .. } = &mut state.phase {
            *detached = true;
        }
    }

    fn transaction(&self, generation: u64) -> Option<T> {
        let state = self.state.lock();
        match &state.phase {
            Phase::Active { tx, .. } if state.generation == generation => Some(tx.clone()),
            _ => None,
        }
    }

    /// Back to idle. Returns the transaction if the claim had one.
    fn release(&self, generation: u64) -> Option<T> {
        let mut state = self.state.lock();
        if state.generation != generation || state.owner().is_none() {
            return None;
        }
        let previous = mem::replace(&mut state.phase, Phase::Idle);
        drop(state);
        self.released.notify_all();

        match previous {
            Phase::Active { tx, .. } => Some(tx),
            _ => None,
        }
    }
}

/// A claim on the slot.
///
/// Dropping an armed guard releases the slot and rolls back whatever
/// transaction is still open, so an early return or a panic can never leave
/// the manager locked.
pub(crate) struct SlotGuard<'a, T: StorageTransaction> {
    slot: &'a TxSlot<T>,
    generation: u64,
    armed: bool,
}

impl<T: StorageTransaction> SlotGuard<'_, T> {
    /// Store the freshly begun transaction.
    pub fn activate(&self, tx: T) {
        self.slot.activate(self.generation, tx);
    }

    /// The open transaction, or `None` if this claim was already resolved.
    pub fn transaction(&self) -> Option<T> {
        self.slot.transaction(self.generation)
    }

    /// Leave the transaction open past this guard, detached; a later
    /// [`TxSlot::adopt`] resolves it.
    pub fn keep(mut self) {
        self.slot.detach(self.generation);
        self.armed = false;
    }

    /// The transaction was committed or rolled back; release the slot.
    pub fn resolved(mut self) {
        self.armed = false;
        self.slot.release(self.generation);
    }
}

impl<T: StorageTransaction> Drop for SlotGuard<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(tx) = self.slot.release(self.generation) {
            warn!(tx_id = tx.id(), "rolling back unresolved transaction");
            if let Err(e) = tx.rollback() {
                error!(tx_id = tx.id(), error = %e, "rollback of unresolved transaction failed");
            }
        }
    }
}
