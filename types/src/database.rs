//! Database collaborator vocabulary.
//!
//! The actual wire protocols live behind the `Database` trait in
//! `dbchat-tools`; these are the plain data shapes it traffics in.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported downstream database kinds, one per logical tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Redis,
    Mysql,
    Clickhouse,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionKind::Redis => "redis",
            ConnectionKind::Mysql => "mysql",
            ConnectionKind::Clickhouse => "clickhouse",
        };
        f.write_str(name)
    }
}

/// A configured connection, as reported by the database collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: String,
    pub name: String,
    pub kind: ConnectionKind,
}

/// Live status of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Result of running one command against a connection.
///
/// Command-level failures are carried in `error` rather than as a hard
/// error; the collaborator reserves hard errors for connection-level
/// problems.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
