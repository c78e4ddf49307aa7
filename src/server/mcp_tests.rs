//! Unit tests for MCP protocol implementation.
//!
//! Tests JSON-RPC 2.0 request/response handling, tool definitions,
//! and the line-delimited serve loop.

use super::*;
use crate::config::Config;
use crate::server::AppState;
use crate::storage::SqliteStorage;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

// ============================================================================
// JsonRpcResponse tests
// ============================================================================

#[test]
fn test_jsonrpc_response_success_with_id() {
    let response = JsonRpcResponse::success(Some(json!(1)), json!({"result": "ok"}));

    assert_eq!(response.jsonrpc, "2.0");
    assert_eq!(response.id, json!(1));
    assert!(response.result.is_some());
    assert!(response.error.is_none());
    assert_eq!(response.result.unwrap()["result"], "ok");
}

#[test]
fn test_jsonrpc_response_success_with_string_id() {
    let response = JsonRpcResponse::success(Some(json!("req-123")), json!({}));

    assert_eq!(response.id, json!("req-123"));
}

#[test]
fn test_jsonrpc_response_success_without_id() {
    let response = JsonRpcResponse::success(None, json!({"data": "value"}));

    assert_eq!(response.id, Value::Null);
    assert!(response.result.is_some());
}

#[test]
fn test_jsonrpc_response_error_with_id() {
    let response = JsonRpcResponse::error(Some(json!(42)), -32600, "Invalid request");

    assert_eq!(response.jsonrpc, "2.0");
    assert_eq!(response.id, json!(42));
    assert!(response.result.is_none());
    assert!(response.error.is_some());

    let error = response.error.unwrap();
    assert_eq!(error.code, -32600);
    assert_eq!(error.message, "Invalid request");
}

#[test]
fn test_jsonrpc_response_error_without_id() {
    let response = JsonRpcResponse::error(None, -32700, "Parse error");

    assert_eq!(response.id, Value::Null);
    assert!(response.error.is_some());
    assert_eq!(response.error.unwrap().code, -32700);
}

#[test]
fn test_jsonrpc_response_serialization() {
    let response = JsonRpcResponse::success(Some(json!(1)), json!({"test": true}));
    let serialized = serde_json::to_string(&response).unwrap();

    assert!(serialized.contains("\"jsonrpc\":\"2.0\""));
    assert!(serialized.contains("\"id\":1"));
    assert!(serialized.contains("\"result\""));
    // Error should be omitted when None
    assert!(!serialized.contains("\"error\""));
}

#[test]
fn test_jsonrpc_error_serialization() {
    let response = JsonRpcResponse::error(Some(json!(1)), -32601, "Method not found");
    let serialized = serde_json::to_string(&response).unwrap();

    assert!(serialized.contains("\"error\""));
    assert!(serialized.contains("-32601"));
    // Result should be omitted when None
    assert!(!serialized.contains("\"result\""));
}

// ============================================================================
// JsonRpcRequest deserialization tests
// ============================================================================

#[test]
fn test_jsonrpc_request_deserialization() {
    let json_str = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#;
    let request: JsonRpcRequest = serde_json::from_str(json_str).unwrap();

    assert_eq!(request.jsonrpc, "2.0");
    assert_eq!(request.id, Some(json!(1)));
    assert_eq!(request.method, "initialize");
    assert!(request.params.is_some());
}

#[test]
fn test_jsonrpc_request_without_params() {
    let json_str = r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#;
    let request: JsonRpcRequest = serde_json::from_str(json_str).unwrap();

    assert_eq!(request.method, "tools/list");
    assert!(request.params.is_none());
}

#[test]
fn test_jsonrpc_notification_no_id() {
    let json_str = r#"{"jsonrpc":"2.0","method":"initialized","params":{}}"#;
    let request: JsonRpcRequest = serde_json::from_str(json_str).unwrap();

    assert!(request.id.is_none());
    assert_eq!(request.method, "initialized");
}

#[test]
fn test_jsonrpc_request_with_string_id() {
    let json_str = r#"{"jsonrpc":"2.0","id":"uuid-123","method":"ping"}"#;
    let request: JsonRpcRequest = serde_json::from_str(json_str).unwrap();

    assert_eq!(request.id, Some(json!("uuid-123")));
}

// ============================================================================
// ToolCallParams deserialization tests
// ============================================================================

#[test]
fn test_tool_call_params_deserialization() {
    let json_str = r#"{"name":"add_thought","arguments":{"content":"test","confidence":0.5}}"#;
    let params: ToolCallParams = serde_json::from_str(json_str).unwrap();

    assert_eq!(params.name, "add_thought");
    assert_eq!(params.arguments.unwrap()["content"], "test");
}

#[test]
fn test_tool_call_params_without_arguments() {
    let json_str = r#"{"name":"list_sessions"}"#;
    let params: ToolCallParams = serde_json::from_str(json_str).unwrap();

    assert_eq!(params.name, "list_sessions");
    assert!(params.arguments.is_none());
}

// ============================================================================
// Tool definition tests
// ============================================================================

#[test]
fn test_all_tools_have_unique_snake_case_names() {
    let tools = all_tools();
    let names: HashSet<&str> = tools.iter().map(|t| t.name.as_str()).collect();

    assert_eq!(names.len(), tools.len());
    assert!(tools.iter().all(|t| t
        .name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c == '_')));
}

#[test]
fn test_canonical_operations_are_exposed() {
    let tools = all_tools();
    let names: HashSet<&str> = tools.iter().map(|t| t.name.as_str()).collect();

    for expected in [
        "create_session",
        "switch_session",
        "load_session",
        "list_sessions",
        "delete_session",
        "add_thought",
        "revise_thought",
        "create_branch",
        "merge_branch",
        "store_memory",
        "revise_memory",
        "query_memories",
        "create_collection",
        "merge_collection",
        "record_decision",
        "query_decisions",
        "get_context_chunk",
        "run_auto_cycle",
        "export_session",
        "explore_packages",
        "detect_code_reinvention",
        "prevent_reinvention_check",
        "store_code_pattern",
    ] {
        assert!(names.contains(expected), "missing tool {}", expected);
    }
}

#[test]
fn test_tool_schemas_are_objects() {
    for tool in all_tools() {
        assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
        assert_eq!(
            tool.input_schema["additionalProperties"], false,
            "{}",
            tool.name
        );
    }
}

#[test]
fn test_add_thought_tool_definition() {
    let tool = get_add_thought_tool();
    let schema = &tool.input_schema;

    assert_eq!(schema["properties"]["confidence"]["maximum"], 1);
    let required = schema["required"].as_array().unwrap();
    assert!(required.contains(&json!("content")));
    assert!(required.contains(&json!("confidence")));
    assert!(!required.contains(&json!("session_id")));
}

#[test]
fn test_tool_serialization_uses_input_schema_key() {
    let serialized = serde_json::to_value(get_list_sessions_tool()).unwrap();
    assert!(serialized.get("inputSchema").is_some());
    assert!(serialized.get("input_schema").is_none());
}

// ============================================================================
// Server tests
// ============================================================================

async fn server() -> McpServer {
    let storage = SqliteStorage::new_in_memory().await.unwrap();
    McpServer::new(Arc::new(AppState::new(Config::default(), storage)))
}

fn request(id: i64, method: &str, params: Value) -> JsonRpcRequest {
    JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        id: Some(json!(id)),
        method: method.to_string(),
        params: Some(params),
    }
}

fn tool_text(response: &JsonRpcResponse) -> Value {
    let text = response.result.as_ref().unwrap()["content"][0]["text"]
        .as_str()
        .unwrap()
        .to_string();
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

#[tokio::test]
async fn test_initialize_reports_server_info() {
    let server = server().await;
    let response = server
        .handle_request(request(1, "initialize", json!({})))
        .await
        .unwrap();

    let result = response.result.unwrap();
    assert_eq!(result["protocolVersion"], "2024-11-05");
    assert_eq!(result["serverInfo"]["name"], "mcp-sequential-thinking");
}

#[tokio::test]
async fn test_notification_gets_no_response() {
    let server = server().await;
    let notification = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        id: None,
        method: "initialized".to_string(),
        params: None,
    };

    assert!(server.handle_request(notification).await.is_none());
}

#[tokio::test]
async fn test_unknown_method_is_rpc_error() {
    let server = server().await;
    let response = server
        .handle_request(request(2, "resources/list", json!({})))
        .await
        .unwrap();

    assert_eq!(response.error.unwrap().code, -32601);
}

#[tokio::test]
async fn test_tool_call_without_params_is_invalid_params() {
    let server = server().await;
    let response = server
        .handle_request(JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(3)),
            method: "tools/call".to_string(),
            params: None,
        })
        .await
        .unwrap();

    assert_eq!(response.error.unwrap().code, -32602);
}

#[tokio::test]
async fn test_domain_error_is_tool_error_result() {
    let server = server().await;
    let response = server
        .handle_request(request(
            4,
            "tools/call",
            json!({"name": "add_thought", "arguments": {"content": "x", "confidence": 0.5}}),
        ))
        .await
        .unwrap();

    let result = response.result.as_ref().unwrap();
    assert_eq!(result["isError"], true);
    assert!(tool_text(&response)
        .as_str()
        .unwrap()
        .contains("No active session"));
}

#[tokio::test]
async fn test_unknown_tool_is_tool_error_result() {
    let server = server().await;
    let response = server
        .handle_request(request(5, "tools/call", json!({"name": "teleport"})))
        .await
        .unwrap();

    assert_eq!(response.result.unwrap()["isError"], true);
}

#[tokio::test]
async fn test_tool_calls_share_active_session() {
    let server = server().await;

    let created = server
        .handle_request(request(
            6,
            "tools/call",
            json!({"name": "create_session", "arguments": {"problem_statement": "p"}}),
        ))
        .await
        .unwrap();
    let session_id = tool_text(&created)["id"].as_str().unwrap().to_string();

    let added = server
        .handle_request(request(
            7,
            "tools/call",
            json!({"name": "add_thought", "arguments": {"content": "first", "confidence": 0.9}}),
        ))
        .await
        .unwrap();
    assert!(added.result.as_ref().unwrap().get("isError").is_none());
    assert_eq!(tool_text(&added)["session_id"], session_id.as_str());
}

#[tokio::test]
async fn test_serve_processes_lines_until_eof() {
    let server = server().await;
    let input = concat!(
        r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
        "\n",
        "\n",
        "not json\n",
        r#"{"jsonrpc":"2.0","method":"initialized"}"#,
        "\n",
        r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
        "\n",
    );
    let mut output: Vec<u8> = Vec::new();

    server.serve(input.as_bytes(), &mut output).await.unwrap();

    let lines: Vec<Value> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["id"], 1);
    assert_eq!(lines[1]["error"]["code"], -32700);
    assert_eq!(
        lines[2]["result"]["tools"].as_array().unwrap().len(),
        all_tools().len()
    );
}
