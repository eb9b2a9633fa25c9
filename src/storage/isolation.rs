//! Transaction isolation levels.
//!
//! Two levels are supported:
//! - ReadCommitted: reads of data the transaction has not written see the
//!   latest committed state
//! - RepeatableRead: reads see the state at transaction start (snapshot isolation)

use std::fmt;

use serde::{Deserialize, Serialize};

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Read Committed isolation.
    ///
    /// Each read of data this transaction has not written sees the most
    /// recently committed version. Two reads of the same item may differ if
    /// another transaction commits in between.
    #[default]
    ReadCommitted,

    /// Repeatable Read isolation (Snapshot Isolation).
    ///
    /// All reads see a consistent snapshot of the database as of the
    /// transaction's start, plus the transaction's own writes. Concurrent
    /// commits surface as a conflict at commit time.
    RepeatableRead,
}

impl IsolationLevel {
    /// Check if this isolation level uses snapshot reads.
    pub fn uses_snapshot(&self) -> bool {
        matches!(self, IsolationLevel::RepeatableRead)
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsolationLevel::ReadCommitted => write!(f, "READ COMMITTED"),
            IsolationLevel::RepeatableRead => write!(f, "REPEATABLE READ"),
        }
    }
}

/// Parse isolation level from string (SQL syntax).
impl std::str::FromStr for IsolationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "READ COMMITTED" | "READ_COMMITTED" | "READCOMMITTED" => {
                Ok(IsolationLevel::ReadCommitted)
            }
            "REPEATABLE READ" | "REPEATABLE_READ" | "REPEATABLEREAD" | "SNAPSHOT" => {
                Ok(IsolationLevel::RepeatableRead)
            }
            _ => Err(format!("unknown isolation level: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_isolation() {
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
        assert!(!IsolationLevel::ReadCommitted.uses_snapshot());
        assert!(IsolationLevel::RepeatableRead.uses_snapshot());
    }

    #[test]
    fn test_parse_isolation() {
        assert_eq!(
            "read committed".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::ReadCommitted
        );
        assert_eq!(
            "snapshot".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::RepeatableRead
        );
        assert!("serializable".parse::<IsolationLevel>().is_err());
    }

    #[test]
    fn test_serde_spelling() {
        let json = serde_json::to_string(&IsolationLevel::RepeatableRead).unwrap();
        assert_eq!(json, "\"repeatable_read\"");
        let parsed: IsolationLevel = serde_json::from_str("\"read_committed\"").unwrap();
        assert_eq!(parsed, IsolationLevel::ReadCommitted);
    }
}
