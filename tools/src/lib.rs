//! Database tool catalog and dispatch.
//!
//! The model never touches a database directly. It requests one of a small
//! fixed set of tools ([`catalog`]); after human confirmation the
//! [`ToolDispatcher`] resolves the request against whichever connection of
//! the right kind is currently live and folds every outcome, success or
//! failure, into a single tool-role [`ChatMessage`].
//!
//! Dispatch is deliberately soft-fail: an unknown tool name, unparseable
//! arguments, a missing connection, or an execution error all become
//! human-readable message content. The orchestrator always has something to
//! feed back to the model.

pub mod catalog;
pub mod dispatch;

use thiserror::Error;

use dbchat_types::{CommandOutcome, ConnectionInfo, ConnectionKind, ConnectionState};

pub use crate::catalog::{catalog, confirmation_preview};
pub use crate::dispatch::ToolDispatcher;

/// Connection-level failures from the database collaborator.
///
/// Command-level failures (bad SQL, unknown key) are not errors; they travel
/// inside [`CommandOutcome::error`].
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("no connected {0} database found")]
    NoConnection(ConnectionKind),

    #[error("connection failure: {0}")]
    Connection(String),
}

/// External database collaborator.
///
/// Implementations own the wire protocols and their concurrency safety; this
/// crate only discovers a live connection and runs one command at a time
/// against it.
pub trait Database: Send + Sync {
    fn connections(&self) -> Vec<ConnectionInfo>;

    fn connection_state(&self, connection_id: &str) -> Option<ConnectionState>;

    fn run_command(
        &self,
        connection_id: &str,
        command: &str,
    ) -> Result<CommandOutcome, DatabaseError>;
}

/// First configured connection of `kind` that is currently connected.
pub fn find_connected(
    db: &dyn Database,
    kind: ConnectionKind,
) -> Result<ConnectionInfo, DatabaseError> {
    for conn in db.connections() {
        if conn.kind == kind
            && db.connection_state(&conn.id) == Some(ConnectionState::Connected)
        {
            return Ok(conn);
        }
    }
    tracing::warn!(%kind, "no connected database for tool call");
    Err(DatabaseError::NoConnection(kind))
}
