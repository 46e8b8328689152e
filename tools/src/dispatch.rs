//! Soft-fail tool dispatch.
//!
//! [`ToolDispatcher::execute`] never returns an error: every outcome becomes
//! the content of a tool-role message addressed to the originating call.

use std::fmt::Write as _;
use std::sync::Arc;

use serde_json::Value;

use dbchat_types::{ChatMessage, CommandOutcome, ConnectionKind, ToolCall};

use crate::catalog::{CLICKHOUSE_TOOL, MYSQL_TOOL, REDIS_TOOL};
use crate::{Database, find_connected};

const MAX_REPORTED_ROWS: usize = 10;

struct Runner {
    name: &'static str,
    kind: ConnectionKind,
    /// Key holding the command text inside the call arguments.
    argument: &'static str,
    /// Human label used in reports ("Redis command", "MySQL query", ...).
    label: &'static str,
}

// One runner per downstream database kind.
const RUNNERS: &[Runner] = &[
    Runner {
        name: REDIS_TOOL,
        kind: ConnectionKind::Redis,
        argument: "command",
        label: "Redis command",
    },
    Runner {
        name: MYSQL_TOOL,
        kind: ConnectionKind::Mysql,
        argument: "query",
        label: "MySQL query",
    },
    Runner {
        name: CLICKHOUSE_TOOL,
        kind: ConnectionKind::Clickhouse,
        argument: "query",
        label: "ClickHouse query",
    },
];

/// Maps tool calls onto live database connections.
#[derive(Clone)]
pub struct ToolDispatcher {
    db: Arc<dyn Database>,
}

impl ToolDispatcher {
    #[must_use]
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Run one confirmed tool call to a tool-role message.
    ///
    /// Failures at any step (unknown tool, bad arguments, no live
    /// connection, execution error) are folded into the message content.
    #[must_use]
    pub fn execute(&self, call: &ToolCall) -> ChatMessage {
        let reply = |content: String| ChatMessage::tool(call.id.clone(), content);

        let Some(runner) = RUNNERS.iter().find(|r| r.name == call.function.name) else {
            tracing::error!(name = %call.function.name, "tool runner not found");
            return reply("tool runner not found".to_string());
        };

        let args: Value = match serde_json::from_str(&call.function.arguments) {
            Ok(args) => args,
            Err(e) => {
                tracing::error!(name = %runner.name, %e, "failed to parse tool arguments");
                return reply("failed to parse tool arguments".to_string());
            }
        };

        let Some(text) = args.get(runner.argument).and_then(Value::as_str) else {
            tracing::error!(name = %runner.name, "missing or invalid tool argument");
            return reply(format!("Missing or invalid {}", runner.argument));
        };

        let connection = match find_connected(self.db.as_ref(), runner.kind) {
            Ok(connection) => connection,
            Err(e) => return reply(format!("No connected {} database found: {e}", runner.kind)),
        };

        tracing::debug!(
            name = %runner.name,
            connection = %connection.id,
            "executing tool call"
        );
        let outcome = match self.db.run_command(&connection.id, text) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(name = %runner.name, connection = %connection.id, %e, "tool execution failed");
                return reply(format!("{} failed: {e}", runner.label));
            }
        };

        reply(format_report(runner, &connection.id, text, &outcome))
    }
}

/// Render the outcome the way the model consumes it: a short markdown
/// report. Redis rows are single values; the SQL kinds get columns and a
/// capped data listing.
fn format_report(
    runner: &Runner,
    connection_id: &str,
    text: &str,
    outcome: &CommandOutcome,
) -> String {
    let mut report = String::new();
    let _ = writeln!(report, "**{} executed**", runner.label);
    let _ = writeln!(report, "**{}:** `{text}`", capitalize(runner.argument));
    let _ = writeln!(report, "**Connection:** {connection_id}");

    if let Some(error) = &outcome.error {
        let _ = writeln!(report, "**Error:** {error}");
        return report;
    }

    if runner.kind == ConnectionKind::Redis {
        if outcome.rows.is_empty() {
            let _ = writeln!(report, "**Result:** (empty)");
        } else {
            let _ = writeln!(report, "**Result:**");
            for (i, row) in outcome.rows.iter().enumerate() {
                if let Some(value) = row.first() {
                    let _ = writeln!(report, "  {}. {value}", i + 1);
                }
            }
        }
    } else {
        let _ = writeln!(report, "**Columns:** {}", outcome.columns.join(", "));
        let _ = writeln!(report, "**Rows count:** {}", outcome.rows.len());
        if !outcome.rows.is_empty() {
            let _ = writeln!(report, "**Data:**");
            for (i, row) in outcome.rows.iter().take(MAX_REPORTED_ROWS).enumerate() {
                let _ = writeln!(report, "  {}. [{}]", i + 1, row.join(", "));
            }
            if outcome.rows.len() > MAX_REPORTED_ROWS {
                let _ = writeln!(
                    report,
                    "  ... and {} more rows",
                    outcome.rows.len() - MAX_REPORTED_ROWS
                );
            }
        }
    }

    let _ = writeln!(report, "**Execution time:** {}ms", outcome.elapsed_ms);
    report
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dbchat_types::{CommandOutcome, ConnectionKind, ConnectionState, Role, ToolCall};

    use crate::testing::FakeDatabase;

    use super::ToolDispatcher;

    fn dispatcher(db: FakeDatabase) -> ToolDispatcher {
        ToolDispatcher::new(Arc::new(db))
    }

    fn call(name: &str, arguments: &str) -> ToolCall {
        ToolCall::new("call_1", name, arguments)
    }

    #[test]
    fn unknown_runner_is_soft_failure() {
        let db = FakeDatabase::default();
        let msg = dispatcher(db).execute(&call("does_not_exist", "{}"));
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.content, "tool runner not found");
    }

    #[test]
    fn unparseable_arguments_are_soft_failure() {
        let db = FakeDatabase::with_connection(ConnectionKind::Redis, ConnectionState::Connected);
        let msg = dispatcher(db).execute(&call("execute_redis_command", "{not json"));
        assert_eq!(msg.content, "failed to parse tool arguments");
    }

    #[test]
    fn missing_argument_key_is_soft_failure() {
        let db = FakeDatabase::with_connection(ConnectionKind::Redis, ConnectionState::Connected);
        let msg = dispatcher(db).execute(&call("execute_redis_command", r#"{"cmd":"GET x"}"#));
        assert_eq!(msg.content, "Missing or invalid command");
    }

    #[test]
    fn no_live_connection_is_soft_failure() {
        let db =
            FakeDatabase::with_connection(ConnectionKind::Mysql, ConnectionState::Disconnected);
        let msg = dispatcher(db).execute(&call("execute_mysql_query", r#"{"query":"SELECT 1"}"#));
        assert!(msg.content.starts_with("No connected mysql database found"));
    }

    #[test]
    fn execution_error_is_folded_into_content() {
        let mut db =
            FakeDatabase::with_connection(ConnectionKind::Redis, ConnectionState::Connected);
        db.hard_error = Some("connection reset".to_string());
        let msg = dispatcher(db).execute(&call("execute_redis_command", r#"{"command":"PING"}"#));
        assert_eq!(
            msg.content,
            "Redis command failed: connection failure: connection reset"
        );
    }

    #[test]
    fn redis_report_lists_values() {
        let mut db =
            FakeDatabase::with_connection(ConnectionKind::Redis, ConnectionState::Connected);
        db.outcomes.insert(
            "KEYS *".to_string(),
            CommandOutcome {
                columns: vec!["value".to_string()],
                rows: vec![vec!["user:1".to_string()], vec!["user:2".to_string()]],
                elapsed_ms: 3,
                error: None,
            },
        );

        let msg = dispatcher(db).execute(&call("execute_redis_command", r#"{"command":"KEYS *"}"#));
        assert!(msg.content.contains("**Redis command executed**"));
        assert!(msg.content.contains("**Command:** `KEYS *`"));
        assert!(msg.content.contains("  1. user:1"));
        assert!(msg.content.contains("  2. user:2"));
        assert!(msg.content.contains("**Execution time:** 3ms"));
    }

    #[test]
    fn command_level_error_is_reported_without_rows() {
        let mut db =
            FakeDatabase::with_connection(ConnectionKind::Mysql, ConnectionState::Connected);
        db.outcomes.insert(
            "SELECT bogus".to_string(),
            CommandOutcome {
                error: Some("unknown column 'bogus'".to_string()),
                ..CommandOutcome::default()
            },
        );

        let msg =
            dispatcher(db).execute(&call("execute_mysql_query", r#"{"query":"SELECT bogus"}"#));
        assert!(msg.content.contains("**Error:** unknown column 'bogus'"));
        assert!(!msg.content.contains("**Data:**"));
    }

    #[test]
    fn sql_report_caps_listed_rows() {
        let rows: Vec<Vec<String>> = (0..25).map(|i| vec![i.to_string()]).collect();
        let mut db =
            FakeDatabase::with_connection(ConnectionKind::Clickhouse, ConnectionState::Connected);
        db.outcomes.insert(
            "SELECT n FROM t".to_string(),
            CommandOutcome {
                columns: vec!["n".to_string()],
                rows,
                elapsed_ms: 12,
                error: None,
            },
        );

        let msg = dispatcher(db).execute(&call(
            "execute_clickhouse_query",
            r#"{"query":"SELECT n FROM t"}"#,
        ));
        assert!(msg.content.contains("**Rows count:** 25"));
        assert!(msg.content.contains("  10. [9]"));
        assert!(!msg.content.contains("  11. "));
        assert!(msg.content.contains("... and 15 more rows"));
    }
}
