//! Cancellation and deadlines for operations that open transactions.
//!
//! A [`Context`] is a cheap, clonable value passed to
//! [`UnitOfWork::with_transaction`](crate::uow::UnitOfWork::with_transaction)
//! and [`UnitOfWork::get_repository`](crate::uow::UnitOfWork::get_repository).
//! It only governs the transaction-begin step: commit and rollback run to
//! completion even if the context expires while the callback is running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Why a context is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    /// [`Context::cancel`] was called on this context or one of its parents.
    #[error("context canceled")]
    Canceled,

    /// The context's deadline has passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Default)]
struct CancelNode {
    canceled: AtomicBool,
    parent: Option<Arc<CancelNode>>,
}

impl CancelNode {
    fn is_canceled(&self) -> bool {
        if self.canceled.load(Ordering::Acquire) {
            return true;
        }
        self.parent.as_ref().is_some_and(|p| p.is_canceled())
    }
}

/// Cancellation flag plus optional deadline.
///
/// Children created with [`with_timeout`](Self::with_timeout) or
/// [`with_deadline`](Self::with_deadline) observe their parent's cancellation
/// and never outlive its deadline. Cancelling a child leaves the parent alone.
#[derive(Debug, Clone, Default)]
pub struct Context {
    node: Arc<CancelNode>,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never canceled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a child context that expires after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a child context that expires at `deadline` (or the parent's
    /// deadline, whichever comes first).
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };

        Self {
            node: Arc::new(CancelNode {
                canceled: AtomicBool::new(false),
                parent: Some(self.node.clone()),
            }),
            deadline: Some(deadline),
        }
    }

    /// Derive a child context that can be canceled independently.
    pub fn child(&self) -> Self {
        Self {
            node: Arc::new(CancelNode {
                canceled: AtomicBool::new(false),
                parent: Some(self.node.clone()),
            }),
            deadline: self.deadline,
        }
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.node.canceled.store(true, Ordering::Release);
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline. `None` means no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Why the context is done, or `None` while it is still live.
    ///
    /// Cancellation wins over an expired deadline.
    pub fn err(&self) -> Option<ContextError> {
        if self.node.is_canceled() {
            return Some(ContextError::Canceled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// `Ok(())` while the context is live.
    pub fn check(&self) -> Result<(), ContextError> {
        match self.err() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Check if the context is done.
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }
}
