//! MCP (Model Context Protocol) Server
//!
//! This module implements an MCP server using manual JSON-RPC 2.0 over stdio.
//!
//! # Architecture
//!
//! - **Transport**: JSON-RPC 2.0 over stdio (one JSON object per line)
//! - **Concurrency**: each request runs on its own task; responses go through
//!   a single writer task so lines never interleave
//! - **Dispatch**: a fixed [`TOOLS`] table; every tool receives the shared
//!   [`ConnectionManager`] explicitly
//!
//! # Errors
//!
//! Protocol problems (bad JSON, unknown method, malformed `tools/call`) are
//! JSON-RPC errors. Everything a tool itself rejects, including policy
//! violations and driver failures, is a normal tool result with
//! `isError: true` so the agent can read the message.
//!
//! # Usage
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "mysql": {
//!       "command": "mysql-warden",
//!       "args": ["--config", "/path/to/config.json", "serve"]
//!     }
//!   }
//! }
//! ```

use anyhow::Result;
use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::classifier::{self, QueryType};
use crate::engine::{self, Connector, QueryResult};
use crate::error::WardenError;
use crate::manager::{ConnectionManager, WRITE_TYPES};

/// Protocol version reported by `initialize`
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Server name reported by `initialize`
pub const SERVER_NAME: &str = "mysql-warden";

const PARSE_ERROR: i32 = -32700;
const INVALID_REQUEST: i32 = -32600;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;

// ============================================================================
// JSON-RPC 2.0 Structures
// ============================================================================

/// JSON-RPC 2.0 Request
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[serde(default)]
    #[allow(dead_code)]
    jsonrpc: String,
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    const fn success(id: Option<Value>, result: Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    const fn failure(id: Option<Value>, error: JsonRpcError) -> Self {
        Self { jsonrpc: "2.0", id, result: None, error: Some(error) }
    }
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

impl JsonRpcError {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

// ============================================================================
// MCP Tool Result Structures
// ============================================================================

/// Text content block for MCP tool results
#[derive(Debug, Serialize)]
struct TextContent {
    #[serde(rename = "type")]
    content_type: &'static str,
    text: String,
}

/// MCP tool call result
#[derive(Debug, Serialize)]
struct CallToolResult {
    content: Vec<TextContent>,
    #[serde(rename = "isError")]
    is_error: bool,
}

impl CallToolResult {
    fn text(text: String, is_error: bool) -> Value {
        let result = Self { content: vec![TextContent { content_type: "text", text }], is_error };
        serde_json::to_value(result).unwrap_or(Value::Null)
    }

    fn success(data: &Value) -> Value {
        match serde_json::to_string_pretty(data) {
            Ok(text) => Self::text(text, false),
            Err(e) => Self::error(&WardenError::decode_failed(format!("failed to format result: {e}"))),
        }
    }

    fn error(err: &WardenError) -> Value {
        Self::text(err.message(), true)
    }
}

// ============================================================================
// Tool Table
// ============================================================================

/// Tool identifiers, one per entry in [`TOOLS`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    ListConnections,
    Select,
    Query,
    Insert,
    Update,
    Delete,
    Execute,
    Alter,
    ExecuteUnsafe,
    ListDatabases,
    ListTables,
    DescribeTable,
    GetIndexes,
}

/// A tool exposed over `tools/list`
#[derive(Debug, Clone, Copy)]
pub struct ToolDef {
    pub name: &'static str,
    pub description: &'static str,
    pub tool: Tool,
}

pub const TOOLS: &[ToolDef] = &[
    ToolDef {
        name: "list_connections",
        description: "List all configured database connections with their read-only status",
        tool: Tool::ListConnections,
    },
    ToolDef {
        name: "mysql_select",
        description: "Execute a SELECT query against the MySQL database. Only SELECT queries are \
                      allowed. Safe for auto-accept in MCP clients.",
        tool: Tool::Select,
    },
    ToolDef {
        name: "mysql_query",
        description: "[DEPRECATED] Execute a SQL query against the MySQL database.\n\n\
                      This tool is deprecated. Please use the specific tools instead:\n\
                      - mysql_select: For SELECT queries (safe for auto-accept)\n\
                      - mysql_insert: For INSERT queries\n\
                      - mysql_update: For UPDATE queries\n\
                      - mysql_delete: For DELETE queries\n\
                      - mysql_alter: For ALTER TABLE queries\n\
                      - mysql_execute: For INSERT/UPDATE/DELETE combined\n\
                      - mysql_execute_unsafe: For queries blocked by safety checks\n\n\
                      For read-only connections, only SELECT/SHOW/DESCRIBE/EXPLAIN queries are allowed.",
        tool: Tool::Query,
    },
    ToolDef {
        name: "mysql_insert",
        description: "Execute an INSERT query against the MySQL database. Only INSERT queries are \
                      allowed. Medium risk - consider before auto-accepting.",
        tool: Tool::Insert,
    },
    ToolDef {
        name: "mysql_update",
        description: "Execute an UPDATE query against the MySQL database. Only UPDATE queries are \
                      allowed. High risk - do not auto-accept.",
        tool: Tool::Update,
    },
    ToolDef {
        name: "mysql_delete",
        description: "Execute a DELETE query against the MySQL database. Only DELETE queries are \
                      allowed. High risk - do not auto-accept.",
        tool: Tool::Delete,
    },
    ToolDef {
        name: "mysql_execute",
        description: "Execute an INSERT, UPDATE, or DELETE query against the MySQL database. \
                      High risk - do not auto-accept.",
        tool: Tool::Execute,
    },
    ToolDef {
        name: "mysql_alter",
        description: "Execute an ALTER TABLE query against the MySQL database. Only ALTER queries \
                      are allowed. High risk - do not auto-accept. Still blocks DROP DATABASE, \
                      CREATE DATABASE, GRANT, REVOKE.",
        tool: Tool::Alter,
    },
    ToolDef {
        name: "mysql_execute_unsafe",
        description: "DANGEROUS: Execute ANY SQL query, bypassing all safety checks.\n\n\
                      This tool bypasses:\n\
                      - Dangerous query blocking (DROP, TRUNCATE, CREATE, GRANT, REVOKE)\n\
                      - Sensitive query blocking (SHOW GRANTS, mysql.user access)\n\n\
                      This tool does NOT bypass:\n\
                      - Read-only connection restrictions (that's a configuration choice)\n\n\
                      NEVER auto-accept this tool. Always review queries carefully.",
        tool: Tool::ExecuteUnsafe,
    },
    ToolDef {
        name: "list_databases",
        description: "List all accessible databases",
        tool: Tool::ListDatabases,
    },
    ToolDef {
        name: "list_tables",
        description: "List all tables in a database",
        tool: Tool::ListTables,
    },
    ToolDef {
        name: "describe_table",
        description: "Get the schema/structure of a table including columns, types, and keys",
        tool: Tool::DescribeTable,
    },
    ToolDef {
        name: "get_indexes",
        description: "Get indexes for a table including index name, columns, and uniqueness",
        tool: Tool::GetIndexes,
    },
];

/// Look up a tool by its protocol name
#[must_use]
pub fn find_tool(name: &str) -> Option<&'static ToolDef> {
    TOOLS.iter().find(|def| def.name == name)
}

// ============================================================================
// Tool Arguments
// ============================================================================

#[derive(Debug, Default, Deserialize, JsonSchema)]
struct NoArgs {}

#[derive(Debug, Deserialize, JsonSchema)]
struct StatementArgs {
    /// The named connection to use (from config)
    connection: String,
    /// The SQL statement to execute
    sql: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ConnectionArgs {
    /// The named connection to use (from config)
    connection: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct DatabaseArgs {
    /// The named connection to use (from config)
    connection: String,
    /// Database name (uses connection default if not provided)
    database: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct TableArgs {
    /// The named connection to use (from config)
    connection: String,
    /// Table name
    table: String,
    /// Database name (uses connection default if not provided)
    database: Option<String>,
}

impl Tool {
    /// JSON Schema for this tool's arguments
    #[must_use]
    pub fn input_schema(self) -> Value {
        let schema = match self {
            Self::ListConnections => schema_for!(NoArgs),
            Self::ListDatabases => schema_for!(ConnectionArgs),
            Self::ListTables => schema_for!(DatabaseArgs),
            Self::DescribeTable | Self::GetIndexes => schema_for!(TableArgs),
            Self::Select
            | Self::Query
            | Self::Insert
            | Self::Update
            | Self::Delete
            | Self::Execute
            | Self::Alter
            | Self::ExecuteUnsafe => schema_for!(StatementArgs),
        };
        serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
    }
}

/// Deserialize tool arguments, requiring every required string to be non-empty
fn parse_args<T: DeserializeOwned + JsonSchema>(args: &Value) -> crate::error::Result<T> {
    let args = if args.is_null() { Value::Object(serde_json::Map::new()) } else { args.clone() };

    let schema = schema_for!(T);
    if let Some(object) = &schema.schema.object {
        for field in &object.required {
            let present = args.get(field).and_then(Value::as_str).is_some_and(|s| !s.is_empty());
            if !present {
                return Err(WardenError::invalid_input(format!("{field} parameter is required")));
            }
        }
    }

    serde_json::from_value(args).map_err(|e| WardenError::invalid_input(e.to_string()))
}

/// Backtick-quote a MySQL identifier, doubling embedded backticks
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn qualified(database: Option<&str>, table: &str) -> String {
    match database.filter(|db| !db.is_empty()) {
        Some(db) => format!("{}.{}", quote_identifier(db), quote_identifier(table)),
        None => quote_identifier(table),
    }
}

// ============================================================================
// MCP Server
// ============================================================================

/// Start the MCP server
///
/// Reads JSON-RPC requests from stdin until EOF, handling each on its own
/// task, and writes responses to stdout through a single writer.
///
/// # Errors
///
/// Returns an error if stdio communication fails.
pub async fn serve<C: Connector>(manager: Arc<ConnectionManager<C>>) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    tracing::info!(tools = TOOLS.len(), "MCP server listening on stdio");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut in_flight = JoinSet::new();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let manager = Arc::clone(&manager);
        let tx = tx.clone();
        in_flight.spawn(async move {
            if let Some(response) = handle_message(&manager, &line).await {
                match serde_json::to_string(&response) {
                    Ok(text) => {
                        if let Err(e) = tx.send(text) {
                            tracing::debug!(error = %e, "response dropped, stdout writer has stopped");
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "failed to serialize response"),
                }
            }
        });

        while in_flight.try_join_next().is_some() {}
    }

    while in_flight.join_next().await.is_some() {}
    drop(tx);
    writer.await??;

    tracing::info!("stdin closed, MCP server stopping");
    Ok(())
}

/// Handle one JSON-RPC line
///
/// Returns the response to write, or `None` for notifications.
pub async fn handle_message<C: Connector>(
    manager: &ConnectionManager<C>,
    line: &str,
) -> Option<Value> {
    let response = match serde_json::from_str::<Value>(line) {
        Err(e) => Some(JsonRpcResponse::failure(
            None,
            JsonRpcError::new(PARSE_ERROR, format!("Parse error: {e}")),
        )),
        Ok(raw) => {
            let id = raw.get("id").cloned().filter(|id| !id.is_null());
            match serde_json::from_value::<JsonRpcRequest>(raw) {
                Ok(request) => handle_request(manager, request).await,
                Err(e) => Some(JsonRpcResponse::failure(
                    id,
                    JsonRpcError::new(INVALID_REQUEST, format!("Invalid request: {e}")),
                )),
            }
        }
    };

    response.and_then(|response| serde_json::to_value(response).ok())
}

/// Route a request to the appropriate handler based on the method name
async fn handle_request<C: Connector>(
    manager: &ConnectionManager<C>,
    request: JsonRpcRequest,
) -> Option<JsonRpcResponse> {
    // Notifications never get a response
    let Some(id) = request.id else {
        tracing::debug!(method = %request.method, "notification received");
        return None;
    };

    let result = match request.method.as_str() {
        "initialize" => Ok(handle_initialize()),
        "ping" => Ok(serde_json::json!({})),
        "tools/list" => Ok(handle_list_tools()),
        "tools/call" => handle_call_tool(manager, request.params).await,
        other => Err(JsonRpcError::new(METHOD_NOT_FOUND, format!("Unknown method: {other}"))),
    };

    Some(match result {
        Ok(value) => JsonRpcResponse::success(Some(id), value),
        Err(error) => JsonRpcResponse::failure(Some(id), error),
    })
}

// ============================================================================
// MCP Protocol Handlers
// ============================================================================

fn handle_initialize() -> Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": {}
        },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

fn handle_list_tools() -> Value {
    let tools: Vec<Value> = TOOLS
        .iter()
        .map(|def| {
            serde_json::json!({
                "name": def.name,
                "description": def.description,
                "inputSchema": def.tool.input_schema(),
            })
        })
        .collect();

    serde_json::json!({ "tools": tools })
}

async fn handle_call_tool<C: Connector>(
    manager: &ConnectionManager<C>,
    params: Option<Value>,
) -> std::result::Result<Value, JsonRpcError> {
    let params = params.ok_or_else(|| JsonRpcError::new(INVALID_PARAMS, "Missing params"))?;
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| JsonRpcError::new(INVALID_PARAMS, "Missing tool name"))?;
    let def = find_tool(name)
        .ok_or_else(|| JsonRpcError::new(INVALID_PARAMS, format!("Unknown tool: {name}")))?;

    let arguments = params.get("arguments").unwrap_or(&Value::Null);

    tracing::debug!(tool = def.name, "tool call");
    Ok(match call_tool(manager, def.tool, arguments).await {
        Ok(data) => CallToolResult::success(&data),
        Err(e) => {
            tracing::info!(tool = def.name, code = e.error_code(), "tool call rejected");
            CallToolResult::error(&e)
        }
    })
}

// ============================================================================
// Tool Implementations
// ============================================================================

/// Run one tool against the manager, returning its JSON payload
async fn call_tool<C: Connector>(
    manager: &ConnectionManager<C>,
    tool: Tool,
    args: &Value,
) -> crate::error::Result<Value> {
    match tool {
        Tool::ListConnections => {
            let NoArgs {} = parse_args(args)?;
            to_json(&manager.list_connections())
        }

        Tool::Select => {
            let args: StatementArgs = parse_args(args)?;
            classifier::validate_type(&args.sql, &[QueryType::Select])?;
            to_json(&manager.execute_query(&args.connection, &args.sql).await?)
        }

        Tool::Query => {
            let args: StatementArgs = parse_args(args)?;
            to_json(&manager.execute_query(&args.connection, &args.sql).await?)
        }

        Tool::Insert | Tool::Update | Tool::Delete | Tool::Execute => {
            let allowed: &[QueryType] = match tool {
                Tool::Insert => &[QueryType::Insert],
                Tool::Update => &[QueryType::Update],
                Tool::Delete => &[QueryType::Delete],
                _ => WRITE_TYPES,
            };
            let args: StatementArgs = parse_args(args)?;
            to_json(&manager.execute_write(&args.connection, &args.sql, allowed).await?)
        }

        Tool::Alter => {
            let args: StatementArgs = parse_args(args)?;
            to_json(&manager.execute_alter(&args.connection, &args.sql).await?)
        }

        Tool::ExecuteUnsafe => {
            let args: StatementArgs = parse_args(args)?;
            to_json(&manager.execute_unsafe(&args.connection, &args.sql).await?)
        }

        Tool::ListDatabases => {
            let args: ConnectionArgs = parse_args(args)?;
            let result = manager.execute_query(&args.connection, "SHOW DATABASES").await?;
            to_json(&text_cells(&result))
        }

        Tool::ListTables => {
            let args: DatabaseArgs = parse_args(args)?;
            let sql = match args.database.as_deref().filter(|db| !db.is_empty()) {
                Some(db) => format!("SHOW TABLES FROM {}", quote_identifier(db)),
                None => "SHOW TABLES".to_string(),
            };
            let result = manager.execute_query(&args.connection, &sql).await?;
            to_json(&text_cells(&result))
        }

        Tool::DescribeTable => {
            let args: TableArgs = parse_args(args)?;
            let sql = format!("DESCRIBE {}", qualified(args.database.as_deref(), &args.table));
            let result = manager.execute_query(&args.connection, &sql).await?;
            to_json(&result.to_objects())
        }

        Tool::GetIndexes => {
            let args: TableArgs = parse_args(args)?;
            let sql = format!("SHOW INDEX FROM {}", qualified(args.database.as_deref(), &args.table));
            let result = manager.execute_query(&args.connection, &sql).await?;
            to_json(&group_indexes(&result))
        }
    }
}

fn to_json(data: &impl Serialize) -> crate::error::Result<Value> {
    serde_json::to_value(data)
        .map_err(|e| WardenError::decode_failed(format!("failed to format result: {e}")))
}

/// Every text cell of every row, in row order
fn text_cells(result: &QueryResult) -> Vec<&str> {
    result.rows.iter().flatten().filter_map(engine::Value::as_str).collect()
}

/// Index summary built from `SHOW INDEX` rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    pub name: String,
    pub unique: bool,
    pub columns: Vec<String>,
}

/// Group `SHOW INDEX` rows by key name, in first-seen order
#[must_use]
pub fn group_indexes(result: &QueryResult) -> Vec<IndexSummary> {
    let mut indexes: Vec<IndexSummary> = Vec::new();

    for row in 0..result.rows.len() {
        let Some(key) = result.get(row, "Key_name").and_then(engine::Value::as_str) else {
            continue;
        };
        if key.is_empty() {
            continue;
        }

        let position = match indexes.iter().position(|index| index.name == key) {
            Some(position) => position,
            None => {
                let non_unique = result.get(row, "Non_unique").and_then(engine::Value::as_i64);
                indexes.push(IndexSummary {
                    name: key.to_string(),
                    unique: non_unique == Some(0),
                    columns: Vec::new(),
                });
                indexes.len() - 1
            }
        };

        if let Some(column) = result.get(row, "Column_name").and_then(engine::Value::as_str) {
            if !column.is_empty() {
                indexes[position].columns.push(column.to_string());
            }
        }
    }

    indexes
}
