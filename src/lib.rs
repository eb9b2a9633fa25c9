//! Unit of work - one transaction across every repository an operation touches
//!
//! A [`UnitOfWork`] owns a storage handle and a set of named repository
//! factories. Business operations run inside
//! [`with_transaction`](UnitOfWork::with_transaction): every repository they
//! fetch shares one transaction, which commits when the operation succeeds
//! and rolls back when it fails.
//!
//! The bundled [`GitStore`](storage::git::GitStore) keeps JSON documents in a
//! Git repository, with one branch per transaction.
//!
//! # Example
//!
//! ```no_run
//! use std::error::Error;
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use unit_of_work::context::Context;
//! use unit_of_work::storage::git::{CollectionName, DocumentKey, GitStore, GitTransaction};
//! use unit_of_work::uow::UnitOfWork;
//!
//! let ctx = Context::background();
//! let store = Arc::new(GitStore::open_or_init("./my_data").unwrap());
//! let uow: Arc<UnitOfWork<GitStore, GitTransaction>> = UnitOfWork::new(&ctx, store).unwrap();
//! uow.register("users", |tx| tx.clone());
//!
//! uow.with_transaction(&ctx, |u| {
//!     let users = u.get_repository(&ctx, "users")?;
//!     let name = CollectionName::new("users")?;
//!     users.put(&name, &DocumentKey::new("alice")?, json!({"name": "Alice"}))?;
//!     Ok::<_, Box<dyn Error>>(())
//! })
//! .unwrap();
//! ```

pub mod config;
pub mod context;
pub mod storage;
pub mod uow;

pub use config::{AcquirePolicy, UowConfig};
pub use context::Context;
pub use storage::{Storage, StorageError, StorageTransaction, TxOptions};
pub use uow::{UnitOfWork, UowError, UowResult};
