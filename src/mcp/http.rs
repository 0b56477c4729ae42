//! HTTP endpoint for MCP JSON-RPC requests.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::mcp::rpc::{dispatch, JsonRpcRequest, JsonRpcResponse, PARSE_ERROR};
use crate::mcp::McpSshService;

pub fn router(service: Arc<McpSshService>) -> Router {
    Router::new()
        .route("/mcp", post(mcp_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Handle MCP JSON-RPC requests.
///
/// POST /mcp
pub async fn mcp_handler(State(service): State<Arc<McpSshService>>, body: String) -> Response {
    let request: JsonRpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(JsonRpcResponse::error(
                    None,
                    PARSE_ERROR,
                    format!("Parse error: {}", e),
                )),
            )
                .into_response();
        }
    };

    match dispatch(&service, request).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}
