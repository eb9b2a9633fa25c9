//! Named repository factories.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::uow::error::{UowError, UowResult};

/// Builds a repository bound to an open transaction.
pub type RepositoryFactory<T, R> = Arc<dyn Fn(&T) -> R + Send + Sync>;

/// Name to factory map. Mutations take effect immediately and are not
/// tied to any transaction.
pub(crate) struct Registry<T, R> {
    factories: RwLock<HashMap<String, RepositoryFactory<T, R>>>,
}

impl<T, R> Registry<T, R> {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or overwrite.
    pub fn register(&self, name: String, factory: RepositoryFactory<T, R>) {
        self.factories.write().insert(name, factory);
    }

    pub fn unregister(&self, name: &str) {
        self.factories.write().remove(name);
    }

    /// The factory for `name`, cloned out so it can run without the lock held.
    pub fn lookup(&self, name: &str) -> UowResult<RepositoryFactory<T, R>> {
        self.factories
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| UowError::RepositoryNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }
}
