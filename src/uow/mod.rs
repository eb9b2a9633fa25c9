//! Unit of work: one transaction shared by every repository an operation
//! touches.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        UnitOfWork                           │
//! │   (with_transaction, get_repository, commit / rollback)     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │  Registry   │       │   TxSlot    │       │   current   │
//!  │ (factories) │       │ (Idle/Active│       │  (global    │
//!  │             │       │   + lock)   │       │   accessor) │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use unit_of_work::context::Context;
//! use unit_of_work::storage::git::GitStore;
//! use unit_of_work::uow::UnitOfWork;
//!
//! let ctx = Context::background();
//! let uow = UnitOfWork::new(&ctx, Arc::new(GitStore::open_or_init("./data")?))?;
//! uow.register("accounts", |tx| Repo::Accounts(AccountRepo::new(tx.clone())));
//!
//! uow.with_transaction(&ctx, |u| {
//!     let Repo::Accounts(accounts) = u.get_repository(&ctx, "accounts")? else { unreachable!() };
//!     accounts.withdraw("alice", 40)?;
//!     accounts.deposit("bob", 40)?;
//!     Ok::<_, AppError>(())
//! })?;
//! ```

mod current;
mod error;
mod manager;
mod registry;
mod state;

#[cfg(test)]
mod mock;

pub use current::current;
pub use error::{UowError, UowResult};
pub use manager::UnitOfWork;
pub use registry::RepositoryFactory;
