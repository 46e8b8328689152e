//! The fixed tool catalog advertised to the model.

use serde_json::{Value, json};

use dbchat_types::ToolDefinition;

pub const REDIS_TOOL: &str = "execute_redis_command";
pub const MYSQL_TOOL: &str = "execute_mysql_query";
pub const CLICKHOUSE_TOOL: &str = "execute_clickhouse_query";

/// Tool definitions sent with every model request.
#[must_use]
pub fn catalog() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::function(
            REDIS_TOOL,
            "Execute Redis commands. Use this to interact with Redis databases. \
             The system will automatically use the currently connected Redis database.",
            json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The Redis command to execute (e.g., 'GET key', 'SET key value', 'KEYS *')",
                    },
                },
                "required": ["command"],
            }),
        ),
        ToolDefinition::function(
            MYSQL_TOOL,
            "Execute MySQL/SQL queries. Use this to query MySQL databases. \
             The system will automatically use the currently connected MySQL database.",
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The SQL query to execute",
                    },
                },
                "required": ["query"],
            }),
        ),
        ToolDefinition::function(
            CLICKHOUSE_TOOL,
            "Execute ClickHouse queries. Use this to query ClickHouse databases. \
             The system will automatically use the currently connected ClickHouse database.",
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The ClickHouse query to execute",
                    },
                },
                "required": ["query"],
            }),
        ),
    ]
}

/// Human-readable preview of a tool call, shown on its confirmation card.
#[must_use]
pub fn confirmation_preview(function_name: &str, args: &Value) -> String {
    let text_arg = |key: &str| args.get(key).and_then(Value::as_str).unwrap_or_default();
    match function_name {
        REDIS_TOOL => format!("Run Redis command: `{}`", text_arg("command")),
        MYSQL_TOOL => format!("Run MySQL query: `{}`", text_arg("query")),
        CLICKHOUSE_TOOL => format!("Run ClickHouse query: `{}`", text_arg("query")),
        other => format!("Run tool: {other}"),
    }
}
