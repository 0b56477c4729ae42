//! JSON-RPC 2.0 framing shared by the HTTP and stdio transports.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::mcp::McpSshService;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const PARSE_ERROR: i32 = -32700;
pub const METHOD_NOT_FOUND: i32 = -32601;

/// JSON-RPC request structure.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[allow(dead_code)]
    #[serde(default)]
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: Option<Value>,
    id: Option<Value>,
}

impl JsonRpcRequest {
    /// Requests without an id are notifications and get no response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
    id: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

impl JsonRpcResponse {
    fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError { code, message }),
            id,
        }
    }
}

/// Handles one request. Returns `None` for notifications.
pub async fn dispatch(service: &McpSshService, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
    let notification = request.is_notification();

    let response = match request.method.as_str() {
        "initialize" => JsonRpcResponse::success(
            request.id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": service.get_server_info(),
                "capabilities": {
                    "tools": {}
                }
            }),
        ),

        "ping" => JsonRpcResponse::success(request.id, json!({})),

        "tools/list" => {
            let tools = service.list_tools();
            let tools_json: Vec<Value> = tools
                .into_iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "inputSchema": t.input_schema
                    })
                })
                .collect();

            JsonRpcResponse::success(request.id, json!({ "tools": tools_json }))
        }

        "tools/call" => {
            let params = request.params.unwrap_or(json!({}));
            let tool_name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
            let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

            let result = service.call_tool(tool_name, arguments).await;

            // Serialize the Content using serde (rmcp types are serializable)
            let content_json = serde_json::to_value(&result.content).unwrap_or_default();

            JsonRpcResponse::success(
                request.id,
                json!({
                    "content": content_json,
                    "isError": result.is_error.unwrap_or(false)
                }),
            )
        }

        "notifications/initialized" => JsonRpcResponse::success(request.id, json!({})),

        _ => JsonRpcResponse::error(
            request.id,
            METHOD_NOT_FOUND,
            format!("Method not found: {}", request.method),
        ),
    };

    if notification {
        None
    } else {
        Some(response)
    }
}
