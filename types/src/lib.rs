//! Core domain types for dbchat.
//!
//! Everything here is plain data: the chat message model shared between the
//! model client, the persistence layer, and the orchestrator; the tool-call
//! vocabulary; listener notices; and the database collaborator vocabulary.
//! No IO, no async.

mod database;
mod message;
mod notice;
mod tool;

pub use database::{CommandOutcome, ConnectionInfo, ConnectionKind, ConnectionState};
pub use message::{ChatMessage, Role};
pub use notice::{Notice, NoticeKind};
pub use tool::{FunctionCall, FunctionSpec, ToolCall, ToolDefinition};
