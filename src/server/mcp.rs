//! MCP protocol implementation for JSON-RPC 2.0 communication.
//!
//! This module provides the core MCP server implementation including:
//! - JSON-RPC 2.0 request/response handling
//! - Tool definitions and schemas
//! - Stdio-based server communication

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

use super::{handle_tool_call, SharedState};

#[cfg(test)]
#[path = "mcp_tests.rs"]
mod mcp_tests;

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request identifier (None for notifications).
    pub id: Option<Value>,
    /// The method name to invoke.
    pub method: String,
    /// Optional parameters for the method.
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Request identifier (null if notification, must always be present per spec).
    pub id: Value,
    /// The result on success (mutually exclusive with error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The error on failure (mutually exclusive with result).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    /// Error code (negative for predefined errors).
    pub code: i32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// MCP server information returned during initialization.
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    /// The server name identifier.
    pub name: String,
    /// The server version string.
    pub version: String,
}

/// MCP server capabilities advertised to clients.
#[derive(Debug, Serialize)]
pub struct Capabilities {
    /// Tool-related capabilities.
    pub tools: ToolCapabilities,
}

/// Tool-specific capabilities.
#[derive(Debug, Serialize)]
pub struct ToolCapabilities {
    /// Whether the tool list can change dynamically.
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

/// Result of the MCP initialize handshake.
#[derive(Debug, Serialize)]
pub struct InitializeResult {
    /// The MCP protocol version supported.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Server capabilities.
    pub capabilities: Capabilities,
    /// Server identification information.
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// MCP tool definition with JSON Schema.
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    /// Unique tool name (used in tool calls).
    pub name: String,
    /// Human-readable description of the tool.
    pub description: String,
    /// JSON Schema for the tool's input parameters.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Parameters for a tools/call request.
#[derive(Debug, Deserialize)]
pub struct ToolCallParams {
    /// The name of the tool to invoke.
    pub name: String,
    /// Optional arguments for the tool.
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Content item within a tool result.
#[derive(Debug, Serialize)]
pub struct ToolResultContent {
    /// The content type (e.g., "text").
    #[serde(rename = "type")]
    pub content_type: String,
    /// The text content of the result.
    pub text: String,
}

/// Result of a tool invocation.
#[derive(Debug, Serialize)]
pub struct ToolCallResult {
    /// The result content items.
    pub content: Vec<ToolResultContent>,
    /// Whether the result represents an error.
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// MCP Server running over stdio.
///
/// Handles JSON-RPC 2.0 messages, one per line, for MCP protocol
/// communication with clients.
pub struct McpServer {
    /// Shared application state.
    state: SharedState,
}

impl McpServer {
    /// Create a new MCP server
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Run the server using async stdio
    pub async fn run(&self) -> std::io::Result<()> {
        info!("MCP Sequential Thinking Server starting...");
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Serve line-delimited JSON-RPC from `reader` until EOF, writing
    /// responses to `writer`.
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;

            // EOF reached
            if bytes_read == 0 {
                info!("EOF received, shutting down");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            debug!(request = %trimmed, "Received request");

            let response = match serde_json::from_str::<JsonRpcRequest>(trimmed) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => {
                    error!(error = %e, "Failed to parse request");
                    Some(JsonRpcResponse::error(
                        None,
                        -32700,
                        format!("Parse error: {}", e),
                    ))
                }
            };

            // Only send response if not a notification (per JSON-RPC 2.0 spec)
            if let Some(response) = response {
                let response_json = serde_json::to_string(&response)?;
                debug!(response = %response_json, "Sending response");

                writer.write_all(response_json.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }

        Ok(())
    }

    /// Handle a single JSON-RPC request.
    ///
    /// Returns `None` for notifications (requests without id).
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let is_notification = request.id.is_none();

        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(request.id)),
            "initialized" | "notifications/initialized" => {
                debug!("Received initialized notification");
                None
            }
            "notifications/cancelled" => {
                debug!("Received cancelled notification");
                None
            }
            "tools/list" => Some(self.handle_tools_list(request.id)),
            "tools/call" => Some(self.handle_tool_call(request.id, request.params).await),
            "ping" => Some(JsonRpcResponse::success(
                request.id,
                Value::Object(Default::default()),
            )),
            method => {
                if is_notification {
                    debug!(method = %method, "Unknown notification, ignoring");
                    None
                } else {
                    error!(method = %method, "Unknown method");
                    Some(JsonRpcResponse::error(
                        request.id,
                        -32601,
                        format!("Method not found: {}", method),
                    ))
                }
            }
        }
    }

    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling initialize request");

        let result = InitializeResult {
            protocol_version: "2024-11-05".to_string(),
            capabilities: Capabilities {
                tools: ToolCapabilities {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: "mcp-sequential-thinking".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        match serde_json::to_value(result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize initialize result");
                JsonRpcResponse::error(id, -32603, format!("Internal error: {}", e))
            }
        }
    }

    fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling tools/list request");

        JsonRpcResponse::success(
            id,
            serde_json::json!({
                "tools": all_tools()
            }),
        )
    }

    async fn handle_tool_call(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: ToolCallParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(p) => p,
                Err(e) => {
                    return JsonRpcResponse::error(id, -32602, format!("Invalid params: {}", e));
                }
            },
            None => {
                return JsonRpcResponse::error(id, -32602, "Missing params");
            }
        };

        info!(tool = %params.name, "Handling tool call");

        let (content, is_error) =
            match handle_tool_call(&self.state, &params.name, params.arguments).await {
                Ok(result) => {
                    let text = serde_json::to_string_pretty(&result).unwrap_or_else(|e| {
                        error!(error = %e, "Failed to serialize tool result");
                        format!("{{\"error\": \"Serialization failed: {}\"}}", e)
                    });
                    (
                        ToolResultContent {
                            content_type: "text".to_string(),
                            text,
                        },
                        None,
                    )
                }
                Err(e) => {
                    info!(tool = %params.name, error = %e, "Tool call failed");
                    (
                        ToolResultContent {
                            content_type: "text".to_string(),
                            text: format!("Error: {}", e),
                        },
                        Some(true),
                    )
                }
            };

        let tool_result = ToolCallResult {
            content: vec![content],
            is_error,
        };

        match serde_json::to_value(tool_result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize tool call result");
                JsonRpcResponse::error(id, -32603, format!("Internal error: {}", e))
            }
        }
    }
}

/// Every tool the server exposes.
pub fn all_tools() -> Vec<Tool> {
    vec![
        // Sessions
        get_create_session_tool(),
        get_switch_session_tool(),
        get_load_session_tool(),
        get_list_sessions_tool(),
        get_delete_session_tool(),
        get_active_session_tool(),
        get_export_session_tool(),
        get_import_session_tool(),
        get_analyze_session_tool(),
        // Reasoning graph
        get_add_thought_tool(),
        get_revise_thought_tool(),
        get_create_branch_tool(),
        get_merge_branch_tool(),
        get_abandon_branch_tool(),
        // Memory store
        get_store_memory_tool(),
        get_revise_memory_tool(),
        get_query_memories_tool(),
        get_create_collection_tool(),
        get_merge_collection_tool(),
        get_add_to_collection_tool(),
        get_record_decision_tool(),
        get_query_decisions_tool(),
        // Context and automation
        get_context_chunk_tool(),
        get_run_auto_cycle_tool(),
        get_suggest_packages_tool(),
        get_explore_packages_tool(),
        get_detect_code_reinvention_tool(),
        get_prevent_reinvention_check_tool(),
        get_store_code_pattern_tool(),
    ]
}

fn session_id_property() -> Value {
    serde_json::json!({
        "type": "string",
        "description": "Session ID; defaults to the active session"
    })
}

fn tool(name: &str, description: &str, input_schema: Value) -> Tool {
    Tool {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

// ============================================================================
// Session tools
// ============================================================================

fn get_create_session_tool() -> Tool {
    tool(
        "create_session",
        "Create a thinking session and make it the active session.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "problem_statement": {
                    "type": "string",
                    "description": "The problem to reason about"
                },
                "success_criteria": {
                    "type": "string",
                    "description": "What a good outcome looks like"
                },
                "constraints": {
                    "type": "string",
                    "description": "Known limitations"
                },
                "session_type": {
                    "type": "string",
                    "enum": ["general", "coding", "memory"],
                    "description": "Kind of session (default: general)"
                },
                "codebase_context": {
                    "type": "string",
                    "description": "Description of the codebase, for coding sessions"
                },
                "package_exploration_required": {
                    "type": "boolean",
                    "description": "Whether the auto-cycle should discover packages (default: true)"
                }
            },
            "required": ["problem_statement"],
            "additionalProperties": false
        }),
    )
}

fn get_switch_session_tool() -> Tool {
    tool(
        "switch_session",
        "Make another session active, loading it from storage if needed.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": {
                    "type": "string",
                    "description": "Session to activate"
                }
            },
            "required": ["session_id"],
            "additionalProperties": false
        }),
    )
}

fn get_load_session_tool() -> Tool {
    tool(
        "load_session",
        "Re-read a session from storage and make it active.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": {
                    "type": "string",
                    "description": "Session to load"
                }
            },
            "required": ["session_id"],
            "additionalProperties": false
        }),
    )
}

fn get_list_sessions_tool() -> Tool {
    tool(
        "list_sessions",
        "List every stored session, marking the active one.",
        serde_json::json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        }),
    )
}

fn get_delete_session_tool() -> Tool {
    tool(
        "delete_session",
        "Delete a session with all its thoughts, branches, memories, collections and decisions.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": {
                    "type": "string",
                    "description": "Session to delete"
                }
            },
            "required": ["session_id"],
            "additionalProperties": false
        }),
    )
}

fn get_active_session_tool() -> Tool {
    tool(
        "get_active_session",
        "Show the active session and its entity counts.",
        serde_json::json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        }),
    )
}

fn get_export_session_tool() -> Tool {
    tool(
        "export_session",
        "Export a whole session as one JSON document.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": session_id_property()
            },
            "additionalProperties": false
        }),
    )
}

fn get_import_session_tool() -> Tool {
    tool(
        "import_session",
        "Import an exported session under its original IDs. The session is not activated.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "export": {
                    "type": "object",
                    "description": "Document produced by export_session"
                },
                "overwrite": {
                    "type": "boolean",
                    "description": "Replace an existing session with the same ID (default: false)"
                }
            },
            "required": ["export"],
            "additionalProperties": false
        }),
    )
}

fn get_analyze_session_tool() -> Tool {
    tool(
        "analyze_session",
        "Counts, branch states, mean confidence and token estimate of a session.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": session_id_property()
            },
            "additionalProperties": false
        }),
    )
}

// ============================================================================
// Reasoning graph tools
// ============================================================================

fn get_add_thought_tool() -> Tool {
    tool(
        "add_thought",
        "Add a thought. Dependencies must exist and be visible from the thought's line; cycles are rejected.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": session_id_property(),
                "content": {
                    "type": "string",
                    "description": "The thought"
                },
                "confidence": {
                    "type": "number",
                    "minimum": 0,
                    "maximum": 1,
                    "description": "Confidence (0.0-1.0)"
                },
                "dependencies": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "IDs of thoughts this one builds on"
                },
                "branch_id": {
                    "type": "string",
                    "description": "Open branch to add the thought to; main line if omitted"
                },
                "suggested_packages": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Packages relevant to this thought"
                }
            },
            "required": ["content", "confidence"],
            "additionalProperties": false
        }),
    )
}

fn get_revise_thought_tool() -> Tool {
    tool(
        "revise_thought",
        "Revise a thought's content or confidence. The previous version is kept in its revision log.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": session_id_property(),
                "thought_id": {
                    "type": "string",
                    "description": "Thought to revise"
                },
                "content": {
                    "type": "string",
                    "description": "New content"
                },
                "confidence": {
                    "type": "number",
                    "minimum": 0,
                    "maximum": 1,
                    "description": "New confidence"
                }
            },
            "required": ["thought_id"],
            "additionalProperties": false
        }),
    )
}

fn get_create_branch_tool() -> Tool {
    tool(
        "create_branch",
        "Fork an alternative line of reasoning from a thought.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": session_id_property(),
                "name": {
                    "type": "string",
                    "description": "Branch name"
                },
                "from_thought": {
                    "type": "string",
                    "description": "Thought to fork from"
                },
                "purpose": {
                    "type": "string",
                    "description": "What the branch explores"
                }
            },
            "required": ["name", "from_thought"],
            "additionalProperties": false
        }),
    )
}

fn get_merge_branch_tool() -> Tool {
    tool(
        "merge_branch",
        "Merge an open branch after a target thought. Fails if already merged or if the merge would create a cycle.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": session_id_property(),
                "branch_id": {
                    "type": "string",
                    "description": "Branch to merge"
                },
                "target_thought": {
                    "type": "string",
                    "description": "Thought the branch is merged after"
                }
            },
            "required": ["branch_id", "target_thought"],
            "additionalProperties": false
        }),
    )
}

fn get_abandon_branch_tool() -> Tool {
    tool(
        "abandon_branch",
        "Close an open branch without merging it. Its thoughts stay in the graph.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": session_id_property(),
                "branch_id": {
                    "type": "string",
                    "description": "Branch to abandon"
                }
            },
            "required": ["branch_id"],
            "additionalProperties": false
        }),
    )
}

// ============================================================================
// Memory store tools
// ============================================================================

fn get_store_memory_tool() -> Tool {
    tool(
        "store_memory",
        "Store a durable insight, optionally with a code snippet and tags.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": session_id_property(),
                "content": {
                    "type": "string",
                    "description": "The insight"
                },
                "tags": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Tags (case-insensitive)"
                },
                "importance": {
                    "type": "number",
                    "minimum": 0,
                    "maximum": 1,
                    "description": "Importance (default: 0.5)"
                },
                "confidence": {
                    "type": "number",
                    "minimum": 0,
                    "maximum": 1,
                    "description": "Confidence (default: 0.8)"
                },
                "code_snippet": {
                    "type": "string",
                    "description": "Code the insight refers to"
                },
                "language": {
                    "type": "string",
                    "description": "Language of the snippet"
                },
                "pattern": {
                    "type": "string",
                    "description": "Pattern label"
                },
                "collection_id": {
                    "type": "string",
                    "description": "Collection to add the memory to"
                }
            },
            "required": ["content"],
            "additionalProperties": false
        }),
    )
}

fn get_revise_memory_tool() -> Tool {
    tool(
        "revise_memory",
        "Revise a memory's content or importance.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": session_id_property(),
                "memory_id": {
                    "type": "string",
                    "description": "Memory to revise"
                },
                "content": {
                    "type": "string",
                    "description": "New content"
                },
                "importance": {
                    "type": "number",
                    "minimum": 0,
                    "maximum": 1,
                    "description": "New importance"
                }
            },
            "required": ["memory_id"],
            "additionalProperties": false
        }),
    )
}

fn get_query_memories_tool() -> Tool {
    tool(
        "query_memories",
        "Find memories carrying all given tags, most important first.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": session_id_property(),
                "tags": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Every one of these tags must be present"
                },
                "content_contains": {
                    "type": "string",
                    "description": "Case-insensitive substring of the content"
                },
                "min_importance": {
                    "type": "number",
                    "minimum": 0,
                    "maximum": 1,
                    "description": "Minimum importance"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Maximum number of results"
                }
            },
            "additionalProperties": false
        }),
    )
}

fn get_create_collection_tool() -> Tool {
    tool(
        "create_collection",
        "Create a named collection of memories.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": session_id_property(),
                "name": {
                    "type": "string",
                    "description": "Collection name"
                },
                "purpose": {
                    "type": "string",
                    "description": "What the collection gathers"
                },
                "memory_id": {
                    "type": "string",
                    "description": "Memory to seed the collection with"
                }
            },
            "required": ["name"],
            "additionalProperties": false
        }),
    )
}

fn get_merge_collection_tool() -> Tool {
    tool(
        "merge_collection",
        "Add every memory of the source collection to the target collection.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": session_id_property(),
                "target_collection": {
                    "type": "string",
                    "description": "Collection that receives the memories"
                },
                "source_collection": {
                    "type": "string",
                    "description": "Collection whose memories are added; left unchanged"
                }
            },
            "required": ["target_collection", "source_collection"],
            "additionalProperties": false
        }),
    )
}

fn get_add_to_collection_tool() -> Tool {
    tool(
        "add_to_collection",
        "Add one memory to a collection.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": session_id_property(),
                "collection_id": {
                    "type": "string",
                    "description": "Collection"
                },
                "memory_id": {
                    "type": "string",
                    "description": "Memory to add"
                }
            },
            "required": ["collection_id", "memory_id"],
            "additionalProperties": false
        }),
    )
}

fn get_record_decision_tool() -> Tool {
    tool(
        "record_decision",
        "Record an architecture decision with its context, options and rationale.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": session_id_property(),
                "title": {
                    "type": "string",
                    "description": "Short title"
                },
                "context": {
                    "type": "string",
                    "description": "Situation that forced the decision"
                },
                "options": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Options considered"
                },
                "chosen_option": {
                    "type": "string",
                    "description": "The option taken"
                },
                "rationale": {
                    "type": "string",
                    "description": "Why it was taken"
                },
                "consequences": {
                    "type": "string",
                    "description": "Expected consequences"
                },
                "dependencies": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Packages or components the decision relies on"
                }
            },
            "required": ["title"],
            "additionalProperties": false
        }),
    )
}

fn get_query_decisions_tool() -> Tool {
    tool(
        "query_decisions",
        "Find decisions similar to a keyword pattern and tags, best match first.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": session_id_property(),
                "pattern": {
                    "type": "string",
                    "description": "Keywords to look for"
                },
                "tags": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Additional terms to look for"
                },
                "threshold": {
                    "type": "number",
                    "minimum": 0,
                    "maximum": 1,
                    "description": "Minimum similarity (default: 0.7)"
                }
            },
            "additionalProperties": false
        }),
    )
}

// ============================================================================
// Context and automation tools
// ============================================================================

fn get_context_chunk_tool() -> Tool {
    tool(
        "get_context_chunk",
        "Select the most important thoughts, memories and decisions that fit a token budget.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": session_id_property(),
                "budget": {
                    "type": "integer",
                    "minimum": 0,
                    "description": "Token budget (default: configured budget)"
                },
                "required_kinds": {
                    "type": "array",
                    "items": {
                        "type": "string",
                        "enum": ["decision", "thought", "memory"]
                    },
                    "description": "Unit kinds to try first"
                }
            },
            "additionalProperties": false
        }),
    )
}

fn get_run_auto_cycle_tool() -> Tool {
    tool(
        "run_auto_cycle",
        "Run package discovery, thought generation, memory storage, decision recording and validation in order.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": session_id_property(),
                "skip_steps": {
                    "type": "array",
                    "items": {
                        "type": "string",
                        "enum": [
                            "PackageDiscovery",
                            "ThoughtGeneration",
                            "MemoryStorage",
                            "ArchitectureDecision",
                            "Validation"
                        ]
                    },
                    "description": "Steps to skip"
                },
                "pass_threshold": {
                    "type": "number",
                    "minimum": 0,
                    "maximum": 1,
                    "description": "Completeness score needed to pass (default: 0.6)"
                },
                "confidence_threshold": {
                    "type": "number",
                    "minimum": 0,
                    "maximum": 1,
                    "description": "Mean thought confidence that earns the confidence points (default: 0.7)"
                }
            },
            "additionalProperties": false
        }),
    )
}

fn get_suggest_packages_tool() -> Tool {
    tool(
        "suggest_packages",
        "Suggest packages for a task description.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Task description"
                }
            },
            "required": ["query"],
            "additionalProperties": false
        }),
    )
}

fn get_explore_packages_tool() -> Tool {
    tool(
        "explore_packages",
        "Look up packages for a task and keep the relevant ones on the session for later reinvention checks.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": session_id_property(),
                "task": {
                    "type": "string",
                    "description": "Functionality to find packages for"
                }
            },
            "required": ["task"],
            "additionalProperties": false
        }),
    )
}

fn reinvention_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "session_id": session_id_property(),
            "proposal": {
                "type": "string",
                "description": "Proposed code or a description of it"
            },
            "threshold": {
                "type": "number",
                "minimum": 0,
                "maximum": 1,
                "description": "Score above which the proposal is flagged (default: 0.8)"
            }
        },
        "required": ["proposal"],
        "additionalProperties": false
    })
}

fn get_detect_code_reinvention_tool() -> Tool {
    tool(
        "detect_code_reinvention",
        "Score proposed code against the packages already discovered for the session. Each overlapping package adds 0.3.",
        reinvention_schema(),
    )
}

fn get_prevent_reinvention_check_tool() -> Tool {
    tool(
        "prevent_reinvention_check",
        "Explore packages for the proposal, keep them on the session, then score the proposal against every known package.",
        reinvention_schema(),
    )
}

fn get_store_code_pattern_tool() -> Tool {
    tool(
        "store_code_pattern",
        "Store a codebase pattern as a memory tagged code-pattern, carrying its snippet, language and pattern type.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": session_id_property(),
                "pattern_type": {
                    "type": "string",
                    "description": "Kind of pattern, e.g. repository or error-handling"
                },
                "code_snippet": {
                    "type": "string",
                    "description": "The code"
                },
                "description": {
                    "type": "string",
                    "description": "What the pattern is for"
                },
                "language": {
                    "type": "string"
                },
                "file_path": {
                    "type": "string",
                    "description": "Where the pattern lives"
                },
                "tags": {
                    "type": "array",
                    "items": { "type": "string" }
                },
                "importance": {
                    "type": "number",
                    "minimum": 0,
                    "maximum": 1,
                    "description": "Importance (default: 0.5)"
                }
            },
            "required": ["pattern_type", "code_snippet"],
            "additionalProperties": false
        }),
    )
}
