//! type-safe wrappers around git primitives and document names.

use std::fmt;

use git2::Oid;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// This makes sure we don't accidentally pass a tree or blob ID where a commit
/// ID is expected. The inner Oid is only accessible within the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommitId(Oid);

impl CommitId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    pub(crate) fn raw(&self) -> Oid {
        self.0
    }

    /// parse CommitId from a hex string
    pub fn from_hex(hex: &str) -> Result<Self, git2::Error> {
        Oid::from_str(hex).map(CommitId)
    }

    /// short form of the commit ID
    pub fn short(&self) -> String {
        self.0.to_string()[..7].to_string()
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// error type for invalid names (collections, documents, branches)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidNameError {
    #[error("name cannot be empty")]
    Empty,
    #[error("name too long: {0} characters")]
    TooLong(usize),
    #[error("name cannot start with '{0}'")]
    InvalidStart(char),
    #[error("invalid character '{char}' at position {position}")]
    InvalidCharacter { char: char, position: usize },
    #[error("'{0}' is a reserved name")]
    Reserved(String),
    #[error("invalid path: '{0}'")]
    InvalidPath(String),
}

fn validate_chars(name: &str) -> Result<(), InvalidNameError> {
    for (i, c) in name.chars().enumerate() {
        if !c.is_ascii_alphanumeric() && c != '_' && c != '-' {
            return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
        }
    }
    Ok(())
}

/// A validated collection name (a top-level directory in the tree).
///
/// Valid names:
/// - 1-64 characters
/// - Alphanumeric, underscores, hyphens only
/// - Must start with a letter
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CollectionName(String);

impl CollectionName {
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), InvalidNameError> {
        let Some(first) = name.chars().next() else {
            return Err(InvalidNameError::Empty);
        };
        if name.len() > 64 {
            return Err(InvalidNameError::TooLong(name.len()));
        }
        if !first.is_ascii_alphabetic() {
            return Err(InvalidNameError::InvalidStart(first));
        }
        validate_chars(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for CollectionName {
    type Error = InvalidNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CollectionName> for String {
    fn from(value: CollectionName) -> Self {
        value.0
    }
}

/// A validated document key.
///
/// keys are used as filenames (`{key}.json`), so they share the collection
/// character set but may start with any allowed character. They are
/// typically generated (ULIDs).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentKey(String);

impl DocumentKey {
    pub fn new(key: impl Into<String>) -> Result<Self, InvalidNameError> {
        let key = key.into();
        if key.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        if key.len() > 128 {
            return Err(InvalidNameError::TooLong(key.len()));
        }
        validate_chars(&key)?;
        Ok(Self(key))
    }

    /// Generate a new ULID-based key.
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn file_name(&self) -> String {
        format!("{}.json", self.0)
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for DocumentKey {
    type Error = InvalidNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DocumentKey> for String {
    fn from(value: DocumentKey) -> Self {
        value.0
    }
}

/// a branch name, with special handling for transaction branches
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BranchName(String);

impl BranchName {
    /// the main branch name
    pub const MAIN: &'static str = "main";

    /// prefix for transaction branches
    pub const TX_PREFIX: &'static str = "tx/";

    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        if name.contains("..") || name.ends_with('/') || name.starts_with('/') {
            return Err(InvalidNameError::InvalidPath(name));
        }
        Ok(Self(name))
    }

    pub fn main() -> Self {
        Self(Self::MAIN.to_string())
    }

    pub fn for_transaction(tx_id: &str) -> Self {
        Self(format!("{}{}", Self::TX_PREFIX, tx_id))
    }

    /// extract transaction ID if this is a transaction branch
    pub fn transaction_id(&self) -> Option<&str> {
        self.0.strip_prefix(Self::TX_PREFIX)
    }

    /// get the full ref path (e.g., "refs/heads/main")
    pub fn as_ref_path(&self) -> String {
        format!("refs/heads/{}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// git signature (author/committer info)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSignature {
    pub name: String,
    pub email: String,
}

impl GitSignature {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    pub(crate) fn to_git2_signature(&self) -> Result<git2::Signature<'static>, git2::Error> {
        git2::Signature::now(&self.name, &self.email)
    }
}

impl Default for GitSignature {
    fn default() -> Self {
        Self::new("unit-of-work", "uow@localhost")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_name_validation() {
        assert!(CollectionName::new("users").is_ok());
        assert!(CollectionName::new("order_items-v2").is_ok());
        assert_eq!(CollectionName::new(""), Err(InvalidNameError::Empty));
        assert_eq!(
            CollectionName::new("_hidden"),
            Err(InvalidNameError::InvalidStart('_'))
        );
        assert!(matches!(
            CollectionName::new("a/b"),
            Err(InvalidNameError::InvalidCharacter { char: '/', position: 1 })
        ));
        assert!(matches!(
            CollectionName::new("x".repeat(65)),
            Err(InvalidNameError::TooLong(65))
        ));
    }

    #[test]
    fn test_document_key_validation() {
        assert!(DocumentKey::new("01hzx-abc_1").is_ok());
        assert!(DocumentKey::new("../etc").is_err());
        let generated = DocumentKey::generate();
        assert_eq!(generated.as_str().len(), 26);
        assert_eq!(generated.file_name(), format!("{}.json", generated));
    }

    #[test]
    fn test_branch_names() {
        let branch = BranchName::for_transaction("01abc");
        assert_eq!(branch.transaction_id(), Some("01abc"));
        assert_eq!(branch.as_ref_path(), "refs/heads/tx/01abc");
        assert_eq!(BranchName::main().transaction_id(), None);
        assert!(BranchName::new("a/../b").is_err());
    }

    #[test]
    fn test_names_deserialize_with_validation() {
        let name: CollectionName = serde_json::from_str("\"users\"").unwrap();
        assert_eq!(name.as_str(), "users");
        assert!(serde_json::from_str::<CollectionName>("\"9lives\"").is_err());
    }
}
