use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::mcp::dispatcher::DispatchOutcome;
use crate::mcp::types::PROTOCOL_VERSION;
use crate::AppState;

/// `POST /api/mcp`, `POST|PUT|PATCH /api/sse`: one JSON-RPC request per body.
pub async fn rpc(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match state.dispatcher.handle_body(&body).await {
        DispatchOutcome::Reply { status, body } => (status, Json(body)).into_response(),
        DispatchOutcome::Accepted => StatusCode::ACCEPTED.into_response(),
    }
}

/// `GET /api/sse`: readiness probe used by MCP clients before they post.
pub async fn sse_ready() -> Json<Value> {
    Json(json!({
        "status": "MCP Server Ready",
        "protocol": PROTOCOL_VERSION,
    }))
}

/// `GET /api/tools`: a JSON-RPC `tools/list` envelope when the body asks for
/// one, otherwise a plain name/description listing.
pub async fn tools_discovery(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let wants_rpc = serde_json::from_slice::<Value>(&body)
        .ok()
        .filter(|v| v.get("method").and_then(Value::as_str) == Some("tools/list"));

    if wants_rpc.is_some() {
        return rpc(State(state), body).await;
    }

    let tools: Vec<Value> = state
        .dispatcher
        .tools()
        .definitions()
        .iter()
        .map(|t| json!({ "name": t.name, "description": t.description }))
        .collect();
    Json(json!({ "tools": tools })).into_response()
}
