//! Branch and reference management.
//!
//! Transaction branches use a namespaced pattern: `tx/{transaction_id}`,
//! which makes them easy to identify and clean up.

use git2::{BranchType, Repository};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::git::types::{BranchName, CommitId};

/// Manages Git references (branches).
pub(crate) struct RefManager;

impl RefManager {
    /// Resolve a branch name to its current commit ID.
    pub fn resolve_branch(repo: &Repository, branch: &BranchName) -> StorageResult<CommitId> {
        let reference = repo
            .find_reference(&branch.as_ref_path())
            .map_err(|_| StorageError::RefNotFound(branch.to_string()))?;

        let commit = reference
            .peel_to_commit()
            .map_err(|_| StorageError::RefNotFound(branch.to_string()))?;

        Ok(CommitId::new(commit.id()))
    }

    pub fn branch_exists(repo: &Repository, branch: &BranchName) -> bool {
        repo.find_reference(&branch.as_ref_path()).is_ok()
    }

    /// Create a new branch pointing to the given commit.
    pub fn create_branch(repo: &Repository, branch: &BranchName, target: CommitId) -> StorageResult<()> {
        let commit = repo.find_commit(target.raw())?;
        repo.branch(branch.as_str(), &commit, false)?;
        Ok(())
    }

    /// Force-update a branch to point to a new commit.
    pub fn update_branch(repo: &Repository, branch: &BranchName, target: CommitId) -> StorageResult<()> {
        let mut reference = repo
            .find_reference(&branch.as_ref_path())
            .map_err(|_| StorageError::RefNotFound(branch.to_string()))?;

        reference.set_target(target.raw(), &format!("update branch to {}", target.short()))?;
        Ok(())
    }

    /// Update a branch only if it still points to the expected commit.
    pub fn update_branch_if_unchanged(
        repo: &Repository,
        branch: &BranchName,
        expected: CommitId,
        new_target: CommitId,
    ) -> StorageResult<()> {
        let current = Self::resolve_branch(repo, branch)?;

        if current != expected {
            return Err(StorageError::ConcurrentModification {
                branch: branch.to_string(),
            });
        }

        Self::update_branch(repo, branch, new_target)
    }

    pub fn delete_branch(repo: &Repository, branch: &BranchName) -> StorageResult<()> {
        let mut git_branch = repo
            .find_branch(branch.as_str(), BranchType::Local)
            .map_err(|_| StorageError::RefNotFound(branch.to_string()))?;

        git_branch.delete()?;
        Ok(())
    }

    /// List all `tx/*` branches.
    pub fn list_transaction_branches(repo: &Repository) -> StorageResult<Vec<BranchName>> {
        let mut result = Vec::new();
        for entry in repo.branches(Some(BranchType::Local))? {
            let (branch, _) = entry?;
            if let Some(name) = branch.name()? {
                if name.starts_with(BranchName::TX_PREFIX) {
                    if let Ok(branch_name) = BranchName::new(name) {
                        result.push(branch_name);
                    }
                }
            }
        }
        Ok(result)
    }

    /// Create `main` at the given commit (if missing) and point HEAD at it.
    pub fn init_main_branch(repo: &Repository, initial_commit: CommitId) -> StorageResult<()> {
        let main = BranchName::main();

        if !Self::branch_exists(repo, &main) {
            Self::create_branch(repo, &main, initial_commit)?;
        }

        repo.set_head(&main.as_ref_path())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Repository, CommitId) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let commit = {
            let tree_id = repo.treebuilder(None).unwrap().write().unwrap();
            let tree = repo.find_tree(tree_id).unwrap();
            let sig = git2::Signature::now("test", "test@localhost").unwrap();
            let oid = repo.commit(None, &sig, &sig, "init", &tree, &[]).unwrap();
            CommitId::new(oid)
        };
        RefManager::init_main_branch(&repo, commit).unwrap();
        (dir, repo, commit)
    }

    #[test]
    fn test_main_branch_initialized() {
        let (_dir, repo, commit) = setup();
        let head = RefManager::resolve_branch(&repo, &BranchName::main()).unwrap();
        assert_eq!(head, commit);
    }

    #[test]
    fn test_transaction_branch_lifecycle() {
        let (_dir, repo, commit) = setup();
        let branch = BranchName::for_transaction("tx001");

        RefManager::create_branch(&repo, &branch, commit).unwrap();
        assert!(RefManager::branch_exists(&repo, &branch));
        assert_eq!(RefManager::list_transaction_branches(&repo).unwrap(), vec![branch.clone()]);

        RefManager::delete_branch(&repo, &branch).unwrap();
        assert!(!RefManager::branch_exists(&repo, &branch));
        assert!(RefManager::list_transaction_branches(&repo).unwrap().is_empty());
    }

    #[test]
    fn test_compare_and_swap_rejects_moved_branch() {
        let (_dir, repo, commit) = setup();
        let stale = CommitId::from_hex("0123456789abcdef0123456789abcdef01234567").unwrap();

        let result = RefManager::update_branch_if_unchanged(&repo, &BranchName::main(), stale, commit);
        assert!(matches!(result, Err(StorageError::ConcurrentModification { .. })));
    }
}
