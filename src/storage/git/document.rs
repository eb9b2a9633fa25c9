//! Document blobs and the trees that hold them.
//!
//! Layout of every commit's root tree:
//!
//! ```text
//! {collection}/
//!     {key}.json
//! ```
//!
//! Each document is stored as a JSON blob with metadata fields prefixed by
//! `_` so they cannot clash with user fields:
//!
//! ```text
//! {
//!   "_key": "01hzx...",
//!   "_version": 2,
//!   "_updated_at": "2026-01-01T00:00:00Z",
//!   "balance": 40
//! }
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use git2::{FileMode, ObjectType, Repository, Tree};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::git::types::{CollectionName, CommitId, DocumentKey, GitSignature};

/// A stored document: user fields plus version metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub key: DocumentKey,
    /// starts at 1, bumped on every write
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    pub data: BTreeMap<String, Value>,
}

impl Document {
    pub fn new(key: DocumentKey, data: BTreeMap<String, Value>) -> Self {
        Self {
            key,
            version: 1,
            updated_at: Utc::now(),
            data,
        }
    }

    /// Build a document from a JSON object.
    pub fn from_value(key: DocumentKey, value: Value) -> StorageResult<Self> {
        match value {
            Value::Object(map) => Ok(Self::new(key, map.into_iter().collect())),
            other => Err(StorageError::InvalidDocument(format!(
                "document {} must be a JSON object, got {}",
                key,
                kind_of(&other)
            ))),
        }
    }

    /// The successor of `previous` carrying `self`'s data.
    pub(crate) fn succeeding(mut self, previous: Option<&Document>) -> Self {
        if let Some(previous) = previous {
            self.version = previous.version + 1;
        }
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    /// The user fields as a JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(self.data.clone().into_iter().collect())
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[derive(Serialize, Deserialize)]
struct DocumentJson {
    #[serde(rename = "_key")]
    key: String,
    #[serde(rename = "_version")]
    version: u64,
    #[serde(rename = "_updated_at")]
    updated_at: DateTime<Utc>,
    #[serde(flatten)]
    data: BTreeMap<String, Value>,
}

/// BTreeMap keeps field order stable, so identical content hashes to the
/// same blob.
pub(crate) fn serialize_document(doc: &Document) -> StorageResult<Vec<u8>> {
    let json = DocumentJson {
        key: doc.key.as_str().to_string(),
        version: doc.version,
        updated_at: doc.updated_at,
        data: doc.data.clone(),
    };
    Ok(serde_json::to_vec_pretty(&json)?)
}

pub(crate) fn deserialize_document(
    bytes: &[u8],
    collection: &CollectionName,
    expected_key: &DocumentKey,
) -> StorageResult<Document> {
    let json: DocumentJson = serde_json::from_slice(bytes)?;

    if json.key != expected_key.as_str() {
        return Err(StorageError::CorruptedData {
            path: document_path(collection, expected_key),
            reason: format!(
                "key mismatch: file name suggests '{}' but content has '{}'",
                expected_key, json.key
            ),
        });
    }

    Ok(Document {
        key: expected_key.clone(),
        version: json.version,
        updated_at: json.updated_at,
        data: json.data,
    })
}

fn document_path(collection: &CollectionName, key: &DocumentKey) -> PathBuf {
    PathBuf::from(collection.as_str()).join(key.file_name())
}

fn root_tree(repo: &Repository, at: CommitId) -> StorageResult<Tree<'_>> {
    let commit = repo.find_commit(at.raw())?;
    Ok(commit.tree()?)
}

fn collection_tree<'repo>(
    repo: &'repo Repository,
    root: &Tree<'_>,
    collection: &CollectionName,
) -> StorageResult<Option<Tree<'repo>>> {
    match root.get_name(collection.as_str()) {
        Some(entry) if entry.kind() == Some(ObjectType::Tree) => Ok(Some(repo.find_tree(entry.id())?)),
        Some(entry) => Err(StorageError::CorruptedData {
            path: PathBuf::from(collection.as_str()),
            reason: format!("expected a directory, found {:?}", entry.kind()),
        }),
        None => Ok(None),
    }
}

/// Read one document as of `at`.
pub(crate) fn read_document(
    repo: &Repository,
    at: CommitId,
    collection: &CollectionName,
    key: &DocumentKey,
) -> StorageResult<Option<Document>> {
    let root = root_tree(repo, at)?;
    let Some(tree) = collection_tree(repo, &root, collection)? else {
        return Ok(None);
    };
    let Some(entry) = tree.get_name(&key.file_name()) else {
        return Ok(None);
    };

    let blob = repo.find_blob(entry.id())?;
    deserialize_document(blob.content(), collection, key).map(Some)
}

/// List document keys in a collection as of `at`. A missing collection is empty.
pub(crate) fn list_documents(
    repo: &Repository,
    at: CommitId,
    collection: &CollectionName,
) -> StorageResult<Vec<DocumentKey>> {
    let root = root_tree(repo, at)?;
    let Some(tree) = collection_tree(repo, &root, collection)? else {
        return Ok(Vec::new());
    };

    let keys = tree
        .iter()
        .filter(|entry| entry.kind() == Some(ObjectType::Blob))
        .filter_map(|entry| {
            let name = entry.name()?;
            DocumentKey::new(name.strip_suffix(".json")?).ok()
        })
        .collect();

    Ok(keys)
}

/// Write (`Some`) or remove (`None`) a document on top of `parent`.
///
/// Returns the new commit, or `None` when removing a document that does not
/// exist. Empty collections are pruned from the root tree.
pub(crate) fn write_document(
    repo: &Repository,
    parent: CommitId,
    collection: &CollectionName,
    key: &DocumentKey,
    doc: Option<&Document>,
    signature: &GitSignature,
    message: &str,
) -> StorageResult<Option<CommitId>> {
    let root = root_tree(repo, parent)?;
    let mut root_builder = repo.treebuilder(Some(&root))?;
    let mut builder = match collection_tree(repo, &root, collection)? {
        Some(tree) => repo.treebuilder(Some(&tree))?,
        None => repo.treebuilder(None)?,
    };

    let file_name = key.file_name();
    match doc {
        Some(doc) => {
            let blob = repo.blob(&serialize_document(doc)?)?;
            builder.insert(file_name.as_str(), blob, FileMode::Blob.into())?;
        }
        None => {
            if builder.get(file_name.as_str())?.is_none() {
                return Ok(None);
            }
            builder.remove(file_name.as_str())?;
        }
    }

    if builder.len() == 0 {
        if root_builder.get(collection.as_str())?.is_some() {
            root_builder.remove(collection.as_str())?;
        }
    } else {
        let tree_id = builder.write()?;
        root_builder.insert(collection.as_str(), tree_id, FileMode::Tree.into())?;
    }

    let tree = repo.find_tree(root_builder.write()?)?;
    let parent_commit = repo.find_commit(parent.raw())?;
    let sig = signature.to_git2_signature()?;
    let oid = repo.commit(None, &sig, &sig, message, &tree, &[&parent_commit])?;

    Ok(Some(CommitId::new(oid)))
}

/// Commit an empty root tree with no parents.
pub(crate) fn create_initial_commit(repo: &Repository, signature: &GitSignature) -> StorageResult<CommitId> {
    let tree = repo.find_tree(repo.treebuilder(None)?.write()?)?;
    let sig = signature.to_git2_signature()?;
    let oid = repo.commit(None, &sig, &sig, "[uow] initialize repository", &tree, &[])?;
    Ok(CommitId::new(oid))
}
