//! Configuration for the unit of work and the bundled Git store.
//!
//! Everything is serde-derived so it can live in a JSON file next to the
//! rest of an application's settings:
//!
//! ```json
//! {
//!   "acquire": { "mode": "wait", "timeout_ms": 250 },
//!   "transaction": { "isolation": "repeatable_read", "read_only": false }
//! }
//! ```
//!
//! Missing fields fall back to their defaults.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::{IsolationLevel, TxOptions};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// What a caller does when another thread holds the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AcquirePolicy {
    /// Fail immediately with `TransactionAlreadyActive`.
    #[default]
    FailFast,
    /// Block until the manager is idle, up to `timeout_ms`.
    Wait { timeout_ms: u64 },
}

impl AcquirePolicy {
    pub fn wait(timeout: Duration) -> Self {
        Self::Wait {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// How long to block, or `None` for fail-fast.
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            Self::FailFast => None,
            Self::Wait { timeout_ms } => Some(Duration::from_millis(*timeout_ms)),
        }
    }
}

/// Settings for a [`UnitOfWork`](crate::uow::UnitOfWork).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UowConfig {
    pub acquire: AcquirePolicy,
    /// Options passed to every `begin_transaction`.
    pub transaction: TxOptions,
}

impl UowConfig {
    pub fn acquire(mut self, policy: AcquirePolicy) -> Self {
        self.acquire = policy;
        self
    }

    pub fn transaction(mut self, options: TxOptions) -> Self {
        self.transaction = options;
        self
    }

    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.transaction.isolation = isolation;
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        from_json_str(json)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        from_json_file(path)
    }
}

/// Where and how to open a [`GitStore`](crate::storage::git::GitStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitStoreConfig {
    pub path: PathBuf,
    #[serde(default = "default_true")]
    pub create_if_missing: bool,
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_author_email")]
    pub author_email: String,
}

fn default_true() -> bool {
    true
}

fn default_author_name() -> String {
    "unit-of-work".to_string()
}

fn default_author_email() -> String {
    "uow@localhost".to_string()
}

impl GitStoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            create_if_missing: true,
            author_name: default_author_name(),
            author_email: default_author_email(),
        }
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn author(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.author_name = name.into();
        self.author_email = email.into();
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        from_json_str(json)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        from_json_file(path)
    }
}

fn from_json_str<T: DeserializeOwned>(json: &str) -> Result<T, ConfigError> {
    Ok(serde_json::from_str(json)?)
}

fn from_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let text = fs::read_to_string(path)?;
    from_json_str(&text)
}
