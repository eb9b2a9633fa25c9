//! Git-backed document store.
//!
//! Every transaction gets its own branch (`tx/{ulid}`) where writes
//! accumulate as commits. Commit fast-forwards `main` onto the branch head
//! if `main` has not moved since the transaction began; rollback deletes the
//! branch.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        GitStore                          │
//! │   (storage handle: begins transactions, reads `main`)    │
//! └──────────────────────────────────────────────────────────┘
//!                 │ begin_transaction
//!                 ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                     GitTransaction                       │
//! │  (get/put/delete on tx/{id}; commit = CAS on `main`)     │
//! └──────────────────────────────────────────────────────────┘
//!        │                    │                     │
//!        ▼                    ▼                     ▼
//!  ┌────────────┐      ┌────────────┐        ┌────────────┐
//!  │  document  │      │    refs    │        │   types    │
//!  │ (blobs +   │      │ (branches) │        │  (names)   │
//!  │  trees)    │      └────────────┘        └────────────┘
//!  └────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use unit_of_work::context::Context;
//! use unit_of_work::storage::{Storage, StorageTransaction, TxOptions};
//! use unit_of_work::storage::git::{CollectionName, DocumentKey, GitStore};
//!
//! let store = GitStore::open_or_init("./data")?;
//! let tx = store.begin_transaction(&Context::background(), &TxOptions::default())?;
//! let users = CollectionName::new("users")?;
//! tx.put(&users, &DocumentKey::new("alice")?, json!({"name": "Alice"}))?;
//! tx.commit()?;
//! ```

mod document;
mod refs;
mod types;

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use git2::Repository;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::config::GitStoreConfig;
use crate::context::Context;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::{Storage, StorageTransaction, TxOptions};

pub use document::Document;
pub(crate) use refs::RefManager;
pub use types::{BranchName, CollectionName, CommitId, DocumentKey, GitSignature, InvalidNameError};

/// Storage handle over a Git repository.
///
/// Clone this to share across threads - it uses Arc internally.
#[derive(Clone)]
pub struct GitStore {
    inner: Arc<GitStoreInner>,
}

struct GitStoreInner {
    repo: Mutex<Repository>,
    path: PathBuf,
    signature: GitSignature,
    /// ids of transactions begun by this handle and not yet resolved
    live: Mutex<HashSet<String>>,
}

impl GitStore {
    /// Open an existing store.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::open_with_signature(path.as_ref(), GitSignature::default())
    }

    /// Initialize a new store with an empty `main` branch.
    pub fn init(path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::init_with_signature(path.as_ref(), GitSignature::default())
    }

    /// Open the store at `path`, initializing it first if needed.
    pub fn open_or_init(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if path.join(".git").exists() {
            Self::open(path)
        } else {
            Self::init(path)
        }
    }

    /// Open (or create, if allowed) the store described by `config`.
    pub fn open_with_config(config: &GitStoreConfig) -> StorageResult<Self> {
        let signature = GitSignature::new(&config.author_name, &config.author_email);
        if config.path.join(".git").exists() {
            Self::open_with_signature(&config.path, signature)
        } else if config.create_if_missing {
            Self::init_with_signature(&config.path, signature)
        } else {
            Err(StorageError::NotInitialized(config.path.clone()))
        }
    }

    fn open_with_signature(path: &Path, signature: GitSignature) -> StorageResult<Self> {
        let repo = Repository::open(path).map_err(|_| StorageError::NotInitialized(path.to_path_buf()))?;
        Ok(Self::from_repository(repo, path, signature))
    }

    fn init_with_signature(path: &Path, signature: GitSignature) -> StorageResult<Self> {
        let repo = Repository::init(path)?;
        let initial = document::create_initial_commit(&repo, &signature)?;
        RefManager::init_main_branch(&repo, initial)?;
        debug!(path = %path.display(), commit = %initial.short(), "initialized git store");
        Ok(Self::from_repository(repo, path, signature))
    }

    fn from_repository(repo: Repository, path: &Path, signature: GitSignature) -> Self {
        Self {
            inner: Arc::new(GitStoreInner {
                repo: Mutex::new(repo),
                path: path.to_path_buf(),
                signature,
                live: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn signature(&self) -> &GitSignature {
        &self.inner.signature
    }

    /// Execute a function with exclusive access to the repository.
    pub(crate) fn with_repo<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Repository) -> StorageResult<T>,
    {
        let repo = self.inner.repo.lock();
        f(&repo)
    }

    /// Current tip of `main`.
    pub fn head(&self) -> StorageResult<CommitId> {
        self.with_repo(|repo| RefManager::resolve_branch(repo, &BranchName::main()))
    }

    /// Read a committed document.
    pub fn get(&self, collection: &CollectionName, key: &DocumentKey) -> StorageResult<Option<Document>> {
        self.with_repo(|repo| {
            let head = RefManager::resolve_branch(repo, &BranchName::main())?;
            document::read_document(repo, head, collection, key)
        })
    }

    /// List committed document keys in a collection.
    pub fn list(&self, collection: &CollectionName) -> StorageResult<Vec<DocumentKey>> {
        self.with_repo(|repo| {
            let head = RefManager::resolve_branch(repo, &BranchName::main())?;
            document::list_documents(repo, head, collection)
        })
    }

    /// All `tx/*` branches present in the repository.
    pub fn transaction_branches(&self) -> StorageResult<Vec<BranchName>> {
        self.with_repo(RefManager::list_transaction_branches)
    }

    /// Number of transactions begun through this handle and not yet resolved.
    pub fn live_transactions(&self) -> usize {
        self.inner.live.lock().len()
    }

    /// Delete transaction branches that no live transaction owns, e.g. left
    /// behind by a crashed process.
    pub fn cleanup_abandoned(&self) -> StorageResult<usize> {
        let live = self.inner.live.lock().clone();

        self.with_repo(|repo| {
            let mut cleaned = 0;
            for branch in RefManager::list_transaction_branches(repo)? {
                let Some(tx_id) = branch.transaction_id() else {
                    continue;
                };
                if !live.contains(tx_id) && RefManager::delete_branch(repo, &branch).is_ok() {
                    cleaned += 1;
                }
            }
            debug!(cleaned, "cleaned up abandoned transaction branches");
            Ok(cleaned)
        })
    }

    fn forget(&self, tx_id: &str) {
        self.inner.live.lock().remove(tx_id);
    }
}

impl Storage for GitStore {
    type Transaction = GitTransaction;

    fn begin_transaction(&self, ctx: &Context, options: &TxOptions) -> StorageResult<GitTransaction> {
        ctx.check()?;

        let tx_id = Ulid::new().to_string().to_lowercase();
        let (branch, base) = self.with_repo(|repo| {
            let base = RefManager::resolve_branch(repo, &BranchName::main())?;
            let branch = BranchName::for_transaction(&tx_id);
            RefManager::create_branch(repo, &branch, base)?;
            Ok((branch, base))
        })?;

        self.inner.live.lock().insert(tx_id.clone());
        debug!(tx_id = %tx_id, base = %base.short(), isolation = %options.isolation, "began git transaction");

        Ok(GitTransaction {
            inner: Arc::new(GitTxInner {
                store: self.clone(),
                id: tx_id,
                branch,
                base,
                options: *options,
                started_at: Utc::now(),
                progress: Mutex::new(TxProgress {
                    head: base,
                    written: HashSet::new(),
                    status: TxStatus::Active,
                }),
            }),
        })
    }
}

impl fmt::Debug for GitStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitStore")
            .field("path", &self.path())
            .field("signature", self.signature())
            .field("live_transactions", &self.live_transactions())
            .finish()
    }
}

/// Lifecycle of a [`GitTransaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Active,
    Committed,
    RolledBack,
}

/// Handle to one open transaction on a [`GitStore`].
///
/// Clones share the same transaction.
#[derive(Clone)]
pub struct GitTransaction {
    inner: Arc<GitTxInner>,
}

struct GitTxInner {
    store: GitStore,
    id: String,
    branch: BranchName,
    /// `main` when the transaction began
    base: CommitId,
    options: TxOptions,
    started_at: DateTime<Utc>,
    progress: Mutex<TxProgress>,
}

struct TxProgress {
    /// tip of the transaction branch
    head: CommitId,
    written: HashSet<(CollectionName, DocumentKey)>,
    status: TxStatus,
}

impl GitTransaction {
    pub fn options(&self) -> TxOptions {
        self.inner.options
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    pub fn base_commit(&self) -> CommitId {
        self.inner.base
    }

    pub fn branch(&self) -> &BranchName {
        &self.inner.branch
    }

    /// Tip of the transaction branch.
    pub fn head(&self) -> CommitId {
        self.inner.progress.lock().head
    }

    pub fn status(&self) -> TxStatus {
        self.inner.progress.lock().status
    }

    fn ensure_active(&self, progress: &TxProgress) -> StorageResult<()> {
        if progress.status != TxStatus::Active {
            return Err(StorageError::TransactionClosed(self.inner.id.clone()));
        }
        Ok(())
    }

    fn ensure_writable(&self, progress: &TxProgress) -> StorageResult<()> {
        self.ensure_active(progress)?;
        if self.inner.options.read_only {
            return Err(StorageError::ReadOnly(self.inner.id.clone()));
        }
        Ok(())
    }

    /// Read a document.
    ///
    /// Under `RepeatableRead` this sees the snapshot at begin plus this
    /// transaction's writes. Under `ReadCommitted`, documents this
    /// transaction has not written are read from the current `main`.
    pub fn get(&self, collection: &CollectionName, key: &DocumentKey) -> StorageResult<Option<Document>> {
        let progress = self.inner.progress.lock();
        self.ensure_active(&progress)?;

        let own_write = progress.written.contains(&(collection.clone(), key.clone()));
        let read_committed = !self.inner.options.isolation.uses_snapshot();
        let tx_head = progress.head;

        self.inner.store.with_repo(|repo| {
            let at = if read_committed && !own_write {
                RefManager::resolve_branch(repo, &BranchName::main())?
            } else {
                tx_head
            };
            document::read_document(repo, at, collection, key)
        })
    }

    /// List document keys visible on the transaction branch.
    pub fn list(&self, collection: &CollectionName) -> StorageResult<Vec<DocumentKey>> {
        let progress = self.inner.progress.lock();
        self.ensure_active(&progress)?;
        let head = progress.head;
        self.inner
            .store
            .with_repo(|repo| document::list_documents(repo, head, collection))
    }

    /// Insert or replace a document. `value` must be a JSON object.
    pub fn put(&self, collection: &CollectionName, key: &DocumentKey, value: Value) -> StorageResult<Document> {
        let mut progress = self.inner.progress.lock();
        self.ensure_writable(&progress)?;

        let doc = Document::from_value(key.clone(), value)?;
        let message = format!("[uow] put {}/{}\n\ntx: {}", collection, key, self.inner.id);
        let parent = progress.head;

        let (doc, new_head) = self.inner.store.with_repo(|repo| {
            let previous = document::read_document(repo, parent, collection, key)?;
            let doc = doc.succeeding(previous.as_ref());
            let new_head = document::write_document(
                repo,
                parent,
                collection,
                key,
                Some(&doc),
                &self.inner.store.inner.signature,
                &message,
            )?
            .ok_or_else(|| StorageError::Internal("document write produced no commit".to_string()))?;
            RefManager::update_branch(repo, &self.inner.branch, new_head)?;
            Ok((doc, new_head))
        })?;

        progress.head = new_head;
        progress.written.insert((collection.clone(), key.clone()));
        Ok(doc)
    }

    /// Delete a document. Returns whether it existed.
    pub fn delete(&self, collection: &CollectionName, key: &DocumentKey) -> StorageResult<bool> {
        let mut progress = self.inner.progress.lock();
        self.ensure_writable(&progress)?;

        let message = format!("[uow] delete {}/{}\n\ntx: {}", collection, key, self.inner.id);
        let parent = progress.head;

        let new_head = self.inner.store.with_repo(|repo| {
            let new_head = document::write_document(
                repo,
                parent,
                collection,
                key,
                None,
                &self.inner.store.inner.signature,
                &message,
            )?;
            if let Some(head) = new_head {
                RefManager::update_branch(repo, &self.inner.branch, head)?;
            }
            Ok(new_head)
        })?;

        match new_head {
            Some(head) => {
                progress.head = head;
                progress.written.insert((collection.clone(), key.clone()));
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl StorageTransaction for GitTransaction {
    fn id(&self) -> &str {
        &self.inner.id
    }

    /// Fast-forward `main` to the transaction head.
    ///
    /// Fails with [`StorageError::ConcurrentModification`] if `main` moved
    /// since begin; the transaction then stays active so it can be rolled back.
    fn commit(&self) -> StorageResult<()> {
        let mut progress = self.inner.progress.lock();
        self.ensure_active(&progress)?;

        let head = progress.head;
        let base = self.inner.base;
        let branch = &self.inner.branch;

        self.inner.store.with_repo(|repo| {
            if head != base {
                RefManager::update_branch_if_unchanged(repo, &BranchName::main(), base, head)?;
            }
            if let Err(e) = RefManager::delete_branch(repo, branch) {
                warn!(tx_id = %self.inner.id, error = %e, "failed to delete committed transaction branch");
            }
            Ok(())
        })?;

        progress.status = TxStatus::Committed;
        self.inner.store.forget(&self.inner.id);
        debug!(tx_id = %self.inner.id, head = %head.short(), "committed git transaction");
        Ok(())
    }

    fn rollback(&self) -> StorageResult<()> {
        let mut progress = self.inner.progress.lock();
        self.ensure_active(&progress)?;

        let deleted = self
            .inner
            .store
            .with_repo(|repo| RefManager::delete_branch(repo, &self.inner.branch));

        // the writes are discarded either way; a branch we failed to delete
        // is left for cleanup_abandoned
        progress.status = TxStatus::RolledBack;
        self.inner.store.forget(&self.inner.id);
        deleted?;

        debug!(tx_id = %self.inner.id, "rolled back git transaction");
        Ok(())
    }
}

impl fmt::Debug for GitTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitTransaction")
            .field("id", &self.inner.id)
            .field("base", &self.base_commit())
            .field("started_at", &self.started_at())
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    use crate::context::ContextError;
    use crate::storage::IsolationLevel;

    fn setup() -> (TempDir, GitStore) {
        let dir = TempDir::new().unwrap();
        let store = GitStore::init(dir.path()).unwrap();
        (dir, store)
    }

    fn begin(store: &GitStore, options: TxOptions) -> GitTransaction {
        store.begin_transaction(&Context::background(), &options).unwrap()
    }

    fn accounts() -> CollectionName {
        CollectionName::new("accounts").unwrap()
    }

    fn key(k: &str) -> DocumentKey {
        DocumentKey::new(k).unwrap()
    }

    #[test]
    fn test_open_or_init() {
        let dir = TempDir::new().unwrap();
        let head1 = GitStore::open_or_init(dir.path()).unwrap().head().unwrap();
        let head2 = GitStore::open_or_init(dir.path()).unwrap().head().unwrap();
        assert_eq!(head1, head2);
    }

    #[test]
    fn test_open_missing_with_config() {
        let dir = TempDir::new().unwrap();
        let config = GitStoreConfig::new(dir.path().join("absent")).create_if_missing(false);
        assert!(matches!(
            GitStore::open_with_config(&config),
            Err(StorageError::NotInitialized(_))
        ));
    }

    #[test]
    fn test_commit_publishes_writes() {
        let (_dir, store) = setup();
        let tx = begin(&store, TxOptions::default());

        tx.put(&accounts(), &key("alice"), json!({"balance": 100})).unwrap();
        assert!(store.get(&accounts(), &key("alice")).unwrap().is_none());
        assert_eq!(store.live_transactions(), 1);

        tx.commit().unwrap();

        let doc = store.get(&accounts(), &key("alice")).unwrap().unwrap();
        assert_eq!(doc.get("balance"), Some(&json!(100)));
        assert_eq!(tx.status(), TxStatus::Committed);
        assert_eq!(store.live_transactions(), 0);
        assert!(store.transaction_branches().unwrap().is_empty());
    }

    #[test]
    fn test_rollback_discards_writes() {
        let (_dir, store) = setup();
        let initial = store.head().unwrap();
        let tx = begin(&store, TxOptions::default());

        tx.put(&accounts(), &key("alice"), json!({"balance": 100})).unwrap();
        tx.rollback().unwrap();

        assert_eq!(store.head().unwrap(), initial);
        assert!(store.get(&accounts(), &key("alice")).unwrap().is_none());
        assert!(store.transaction_branches().unwrap().is_empty());
        assert_eq!(tx.status(), TxStatus::RolledBack);
    }

    #[test]
    fn test_resolved_transaction_is_inert() {
        let (_dir, store) = setup();
        let tx = begin(&store, TxOptions::default());
        tx.commit().unwrap();

        assert!(matches!(
            tx.put(&accounts(), &key("a"), json!({})),
            Err(StorageError::TransactionClosed(_))
        ));
        assert!(matches!(tx.rollback(), Err(StorageError::TransactionClosed(_))));
        assert!(matches!(tx.commit(), Err(StorageError::TransactionClosed(_))));
    }

    #[test]
    fn test_concurrent_commit_conflicts() {
        let (_dir, store) = setup();
        let tx1 = begin(&store, TxOptions::default());
        let tx2 = begin(&store, TxOptions::default());

        tx1.put(&accounts(), &key("alice"), json!({"balance": 1})).unwrap();
        tx2.put(&accounts(), &key("bob"), json!({"balance": 2})).unwrap();

        tx1.commit().unwrap();
        let err = tx2.commit().unwrap_err();
        assert!(err.is_conflict());

        // still open, so the caller can roll it back
        assert_eq!(tx2.status(), TxStatus::Active);
        tx2.rollback().unwrap();
        assert!(store.get(&accounts(), &key("bob")).unwrap().is_none());
        assert!(store.transaction_branches().unwrap().is_empty());
    }

    #[test]
    fn test_read_only_transaction_rejects_writes() {
        let (_dir, store) = setup();
        let tx = begin(&store, TxOptions::default().read_only(true));

        assert!(matches!(
            tx.put(&accounts(), &key("alice"), json!({})),
            Err(StorageError::ReadOnly(_))
        ));
        // a read-only commit with main moved underneath still succeeds
        let writer = begin(&store, TxOptions::default());
        writer.put(&accounts(), &key("bob"), json!({})).unwrap();
        writer.commit().unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn test_isolation_levels() {
        let (_dir, store) = setup();
        let seed = begin(&store, TxOptions::default());
        seed.put(&accounts(), &key("alice"), json!({"balance": 100})).unwrap();
        seed.commit().unwrap();

        let read_committed = begin(&store, TxOptions::default());
        let snapshot = begin(&store, TxOptions::default().isolation(IsolationLevel::RepeatableRead));

        let writer = begin(&store, TxOptions::default());
        writer.put(&accounts(), &key("alice"), json!({"balance": 50})).unwrap();
        writer.commit().unwrap();

        let seen = read_committed.get(&accounts(), &key("alice")).unwrap().unwrap();
        assert_eq!(seen.get("balance"), Some(&json!(50)));
        assert_eq!(seen.version, 2);

        let seen = snapshot.get(&accounts(), &key("alice")).unwrap().unwrap();
        assert_eq!(seen.get("balance"), Some(&json!(100)));

        // own writes are always visible
        read_committed.put(&accounts(), &key("alice"), json!({"balance": 7})).unwrap();
        let seen = read_committed.get(&accounts(), &key("alice")).unwrap().unwrap();
        assert_eq!(seen.get("balance"), Some(&json!(7)));

        read_committed.rollback().unwrap();
        snapshot.rollback().unwrap();
    }

    #[test]
    fn test_delete_and_list() {
        let (_dir, store) = setup();
        let tx = begin(&store, TxOptions::default());
        tx.put(&accounts(), &key("a"), json!({})).unwrap();
        tx.put(&accounts(), &key("b"), json!({})).unwrap();

        assert!(tx.delete(&accounts(), &key("a")).unwrap());
        assert!(!tx.delete(&accounts(), &key("missing")).unwrap());
        assert_eq!(tx.list(&accounts()).unwrap(), vec![key("b")]);

        tx.commit().unwrap();
        assert_eq!(store.list(&accounts()).unwrap(), vec![key("b")]);
    }

    #[test]
    fn test_canceled_context_refuses_begin() {
        let (_dir, store) = setup();
        let ctx = Context::background();
        ctx.cancel();

        let result = store.begin_transaction(&ctx, &TxOptions::default());
        assert!(matches!(result, Err(StorageError::Context(ContextError::Canceled))));
        assert!(store.transaction_branches().unwrap().is_empty());
    }

    #[test]
    fn test_failed_rollback_closes_transaction() {
        let (_dir, store) = setup();
        let tx = begin(&store, TxOptions::default());
        tx.put(&accounts(), &key("alice"), json!({"balance": 1})).unwrap();

        // branch vanished underneath the handle
        store
            .with_repo(|repo| RefManager::delete_branch(repo, tx.branch()))
            .unwrap();

        assert!(matches!(tx.rollback(), Err(StorageError::RefNotFound(_))));
        assert_eq!(tx.status(), TxStatus::RolledBack);
        assert_eq!(store.live_transactions(), 0);
        assert!(matches!(tx.rollback(), Err(StorageError::TransactionClosed(_))));
        assert!(matches!(
            tx.put(&accounts(), &key("alice"), json!({})),
            Err(StorageError::TransactionClosed(_))
        ));
    }

    #[test]
    fn test_cleanup_abandoned() {
        let (_dir, store) = setup();
        let head = store.head().unwrap();
        store
            .with_repo(|repo| RefManager::create_branch(repo, &BranchName::for_transaction("abandoned"), head))
            .unwrap();
        let live = begin(&store, TxOptions::default());

        assert_eq!(store.cleanup_abandoned().unwrap(), 1);
        assert_eq!(
            store.transaction_branches().unwrap(),
            vec![live.branch().clone()]
        );
        live.rollback().unwrap();
    }
}
