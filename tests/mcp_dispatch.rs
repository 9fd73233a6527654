//! MCP JSON-RPC dispatch against the scripted engine

use mysql_warden::mcp::{handle_message, TOOLS};
use mysql_warden::{
    ConnectionManager, ConnectionPolicy, ConnectionRegistry, QueryResult, ScriptedConnector,
    Value as Cell, WriteResult,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn manager(connector: &ScriptedConnector) -> ConnectionManager<ScriptedConnector> {
    let registry = ConnectionRegistry::from_policies([
        ("dev", ConnectionPolicy::new("localhost", "root", "", "app")),
        ("replica", ConnectionPolicy::new("replica", "reader", "", "app").read_only(true)),
    ]);
    ConnectionManager::new(registry, connector.clone())
}

async fn call(
    manager: &ConnectionManager<ScriptedConnector>,
    tool: &str,
    arguments: Value,
) -> Value {
    let request = json!({
        "jsonrpc": "2.0",
        "id": 7,
        "method": "tools/call",
        "params": {"name": tool, "arguments": arguments}
    });
    handle_message(manager, &request.to_string()).await.unwrap()
}

/// Tool result text and error flag
fn tool_output(response: &Value) -> (String, bool) {
    let result = &response["result"];
    (
        result["content"][0]["text"].as_str().unwrap().to_string(),
        result["isError"].as_bool().unwrap(),
    )
}

fn tool_json(response: &Value) -> Value {
    let (text, is_error) = tool_output(response);
    assert!(!is_error, "unexpected tool error: {text}");
    serde_json::from_str(&text).unwrap()
}

#[tokio::test]
async fn initialize_reports_server_info() {
    let connector = ScriptedConnector::new();
    let response = handle_message(
        &manager(&connector),
        r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
    )
    .await
    .unwrap();

    assert_eq!(response["id"], 1);
    assert_eq!(response["result"]["serverInfo"]["name"], "mysql-warden");
    assert!(response["result"]["capabilities"]["tools"].is_object());
}

#[tokio::test]
async fn notifications_get_no_response() {
    let connector = ScriptedConnector::new();
    let response = handle_message(
        &manager(&connector),
        r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
    )
    .await;

    assert_eq!(response, None);
}

#[tokio::test]
async fn protocol_errors_use_json_rpc_codes() {
    let connector = ScriptedConnector::new();
    let manager = manager(&connector);

    let response = handle_message(&manager, "{not json").await.unwrap();
    assert_eq!(response["error"]["code"], -32700);
    assert_eq!(response["id"], Value::Null);

    let response =
        handle_message(&manager, r#"{"jsonrpc":"2.0","id":2,"method":"resources/list"}"#)
            .await
            .unwrap();
    assert_eq!(response["error"]["code"], -32601);

    let response = call(&manager, "mysql_drop_everything", json!({})).await;
    assert_eq!(response["error"]["code"], -32602);
}

#[tokio::test]
async fn tools_list_matches_table() {
    let connector = ScriptedConnector::new();
    let response = handle_message(
        &manager(&connector),
        r#"{"jsonrpc":"2.0","id":3,"method":"tools/list"}"#,
    )
    .await
    .unwrap();

    let tools = response["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), TOOLS.len());

    let names: Vec<_> = tools.iter().filter_map(|tool| tool["name"].as_str()).collect();
    assert!(names.contains(&"mysql_select"));
    assert!(names.contains(&"mysql_execute_unsafe"));
    assert!(names.contains(&"get_indexes"));

    for tool in tools {
        assert_eq!(tool["inputSchema"]["type"], "object", "tool: {}", tool["name"]);
    }
}

#[tokio::test]
async fn list_connections_tool() {
    let connector = ScriptedConnector::new();
    let response = call(&manager(&connector), "list_connections", Value::Null).await;

    assert_eq!(
        tool_json(&response),
        json!([
            {"name": "dev", "read_only": false},
            {"name": "replica", "read_only": true}
        ])
    );
}

#[tokio::test]
async fn select_tool_rejects_other_types() {
    let connector = ScriptedConnector::new();
    let response =
        call(&manager(&connector), "mysql_select", json!({"connection": "dev", "sql": "SHOW TABLES"}))
            .await;

    let (text, is_error) = tool_output(&response);
    assert!(is_error);
    assert!(text.contains("expected SELECT, got SHOW"));
    assert!(connector.statements().is_empty());
}

#[tokio::test]
async fn missing_arguments_are_tool_errors() {
    let connector = ScriptedConnector::new();
    let manager = manager(&connector);

    let (text, is_error) = tool_output(&call(&manager, "mysql_insert", json!({"sql": "INSERT"})).await);
    assert!(is_error);
    assert!(text.ends_with("connection parameter is required"));

    let (text, is_error) =
        tool_output(&call(&manager, "describe_table", json!({"connection": "dev"})).await);
    assert!(is_error);
    assert!(text.ends_with("table parameter is required"));
}

#[tokio::test]
async fn policy_violations_are_tool_errors() {
    let connector = ScriptedConnector::new();
    let response = call(
        &manager(&connector),
        "mysql_delete",
        json!({"connection": "replica", "sql": "DELETE FROM t"}),
    )
    .await;

    let (text, is_error) = tool_output(&response);
    assert!(is_error);
    assert!(text.contains("read-only"));
}

#[tokio::test]
async fn insert_tool_returns_write_result() {
    let connector = ScriptedConnector::new()
        .with_write("INSERT", WriteResult { rows_affected: 1, last_insert_id: Some(42) });
    let response = call(
        &manager(&connector),
        "mysql_insert",
        json!({"connection": "dev", "sql": "INSERT INTO t (x) VALUES (1)"}),
    )
    .await;

    assert_eq!(tool_json(&response), json!({"rows_affected": 1, "last_insert_id": 42}));
}

#[tokio::test]
async fn unsafe_tool_reports_warning() {
    let connector = ScriptedConnector::new();
    let response = call(
        &manager(&connector),
        "mysql_execute_unsafe",
        json!({"connection": "dev", "sql": "TRUNCATE TABLE logs"}),
    )
    .await;

    let data = tool_json(&response);
    assert_eq!(data["skipped_check"], "dangerous query blocking");
    assert!(data["warning"].as_str().unwrap().starts_with("UNSAFE EXECUTION"));
    assert_eq!(data["write_result"]["rows_affected"], 0);
}

#[tokio::test]
async fn list_tables_quotes_database() {
    let connector = ScriptedConnector::new().with_result(
        "SHOW TABLES",
        QueryResult::new(
            vec!["Tables_in_shop".into()],
            vec![vec!["orders".into()], vec!["users".into()]],
        ),
    );
    let response = call(
        &manager(&connector),
        "list_tables",
        json!({"connection": "dev", "database": "sh`op"}),
    )
    .await;

    assert_eq!(tool_json(&response), json!(["orders", "users"]));
    assert_eq!(connector.statements()[0].sql, "SHOW TABLES FROM `sh``op`");
}

#[tokio::test]
async fn describe_table_returns_row_objects() {
    let connector = ScriptedConnector::new().with_result(
        "DESCRIBE",
        QueryResult::new(
            vec!["Field".into(), "Type".into(), "Null".into()],
            vec![vec!["id".into(), "int".into(), "NO".into()]],
        ),
    );
    let response = call(
        &manager(&connector),
        "describe_table",
        json!({"connection": "dev", "table": "users", "database": "app"}),
    )
    .await;

    assert_eq!(tool_json(&response), json!([{"Field": "id", "Type": "int", "Null": "NO"}]));
    assert_eq!(connector.statements()[0].sql, "DESCRIBE `app`.`users`");
}

#[tokio::test]
async fn get_indexes_groups_columns() {
    let connector = ScriptedConnector::new().with_result(
        "SHOW INDEX",
        QueryResult::new(
            vec!["Key_name".into(), "Non_unique".into(), "Column_name".into()],
            vec![
                vec!["PRIMARY".into(), Cell::Int(0), "id".into()],
                vec!["idx_ab".into(), Cell::Int(1), "a".into()],
                vec!["idx_ab".into(), Cell::Int(1), "b".into()],
            ],
        ),
    );
    let response =
        call(&manager(&connector), "get_indexes", json!({"connection": "dev", "table": "t"})).await;

    assert_eq!(
        tool_json(&response),
        json!([
            {"name": "PRIMARY", "unique": true, "columns": ["id"]},
            {"name": "idx_ab", "unique": false, "columns": ["a", "b"]}
        ])
    );
}

#[tokio::test]
async fn ping_returns_empty_result() {
    let connector = ScriptedConnector::new();
    let response =
        handle_message(&manager(&connector), r#"{"jsonrpc":"2.0","id":"p","method":"ping"}"#)
            .await
            .unwrap();

    assert_eq!(response, json!({"jsonrpc": "2.0", "id": "p", "result": {}}));
}
