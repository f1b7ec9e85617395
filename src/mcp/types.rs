//! MCP (Model Context Protocol) type definitions, server side.
//!
//! Covers the JSON-RPC 2.0 envelope, the two inbound request shapes
//! (canonical and flattened) and the tool discovery / tool result types.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::errors::{AppError, RPC_INVALID_REQUEST};

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ── JSON-RPC 2.0 ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<&AppError> for JsonRpcError {
    fn from(e: &AppError) -> Self {
        Self {
            code: e.rpc_code(),
            message: e.public_message(),
            data: e.rpc_data(),
        }
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

// ── Inbound request shapes ─────────────────────────────────────

/// `{"jsonrpc":"2.0","id":..,"method":..,"params":{..}}`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CanonicalRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// Some low-code agent platforms cannot nest `params`; they send the tool
/// name and arguments as top-level fields instead.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct FlattenedRequest {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub entity: Option<Value>,
    #[serde(default)]
    pub query: Option<Value>,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub justification: Option<Value>,
    #[serde(default)]
    pub customer_filter: Option<Value>,
    #[serde(default)]
    pub min_orders: Option<Value>,
    #[serde(default)]
    pub line_items_to_create: Option<Value>,
    #[serde(default)]
    pub request_id: Option<Value>,
}

const FLAT_FIELDS: &[&str] = &[
    "tool_name",
    "entity",
    "query",
    "payload",
    "customer_filter",
    "min_orders",
    "line_items_to_create",
    "request_id",
];

#[derive(Debug, Clone, PartialEq)]
pub enum InboundRequest {
    Canonical(CanonicalRequest),
    Flattened(FlattenedRequest),
}

/// A request in canonical form, ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    /// `None` for notifications.
    pub id: Option<Value>,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn response_id(&self) -> Value {
        self.id.clone().unwrap_or(Value::Null)
    }

    pub fn is_notification(&self) -> bool {
        matches!(self.method.as_str(), "initialized" | "notifications/initialized")
            || (self.id.is_none() && self.method.starts_with("notifications/"))
    }
}

impl InboundRequest {
    /// Decide which shape a parsed body is. Anything carrying `tool_name`,
    /// or flat tool fields without `params`, is the flattened shape.
    pub fn classify(body: Value) -> Result<Self, JsonRpcError> {
        let Value::Object(obj) = body else {
            return Err(JsonRpcError::new(
                RPC_INVALID_REQUEST,
                "Invalid Request: body must be a JSON object",
            ));
        };

        let flattened = obj.contains_key("tool_name")
            || (!obj.contains_key("params") && FLAT_FIELDS.iter().any(|f| obj.contains_key(*f)));

        if flattened {
            let req: FlattenedRequest = serde_json::from_value(Value::Object(obj))
                .map_err(|e| JsonRpcError::new(RPC_INVALID_REQUEST, format!("Invalid Request: {}", e)))?;
            return Ok(InboundRequest::Flattened(req));
        }

        if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(JsonRpcError::new(
                RPC_INVALID_REQUEST,
                "Invalid Request: jsonrpc must be \"2.0\"",
            ));
        }
        let req: CanonicalRequest = serde_json::from_value(Value::Object(obj))
            .map_err(|e| JsonRpcError::new(RPC_INVALID_REQUEST, format!("Invalid Request: {}", e)))?;
        Ok(InboundRequest::Canonical(req))
    }

    pub fn normalize(self) -> RpcRequest {
        match self {
            InboundRequest::Canonical(req) => RpcRequest {
                id: req.id,
                method: req.method,
                params: req.params.unwrap_or_else(|| Value::Object(Map::new())),
            },
            InboundRequest::Flattened(req) => {
                let mut arguments = Map::new();
                let fields = [
                    ("entity", req.entity),
                    ("query", req.query),
                    ("payload", req.payload),
                    ("justification", req.justification),
                    ("customer_filter", req.customer_filter),
                    ("min_orders", req.min_orders),
                    ("line_items_to_create", req.line_items_to_create),
                    ("request_id", req.request_id),
                ];
                for (key, value) in fields {
                    if let Some(v) = value.filter(|v| !v.is_null()) {
                        arguments.insert(key.to_string(), v);
                    }
                }

                let mut params = Map::new();
                if let Some(name) = req.tool_name {
                    params.insert("name".into(), Value::String(name));
                }
                params.insert("arguments".into(), Value::Object(arguments));

                RpcRequest {
                    id: Some(req.id.unwrap_or_else(|| json!(1))),
                    method: req.method.unwrap_or_else(|| "tools/call".to_string()),
                    params: Value::Object(params),
                }
            }
        }
    }
}

// ── MCP Tool Definitions ───────────────────────────────────────

/// An MCP tool definition as returned by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpToolDef {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

// ── MCP Tool Call / Result ─────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct CallToolParams {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallToolResult {
    pub content: Vec<McpContent>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl CallToolResult {
    /// Tool output rendered as one pretty-printed JSON text block.
    pub fn json(value: &Value) -> Self {
        Self {
            content: vec![McpContent::Text {
                text: serde_json::to_string_pretty(value).unwrap_or_default(),
            }],
            is_error: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpContent {
    Text { text: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_request() {
        let req = InboundRequest::classify(json!({
            "jsonrpc": "2.0", "id": 7, "method": "tools/call",
            "params": {"name": "query_s4hana", "arguments": {"entity": "customers"}}
        }))
        .unwrap()
        .normalize();
        assert_eq!(req.id, Some(json!(7)));
        assert_eq!(req.method, "tools/call");
        assert_eq!(req.params["arguments"]["entity"], "customers");
    }

    #[test]
    fn test_flattened_request_gets_defaults() {
        let inbound = InboundRequest::classify(json!({
            "tool_name": "query_s4hana",
            "entity": "salesorders",
            "query": "$top=5",
            "payload": null
        }))
        .unwrap();
        assert!(matches!(inbound, InboundRequest::Flattened(_)));

        let req = inbound.normalize();
        assert_eq!(req.id, Some(json!(1)));
        assert_eq!(req.method, "tools/call");
        assert_eq!(
            req.params,
            json!({"name": "query_s4hana", "arguments": {"entity": "salesorders", "query": "$top=5"}})
        );
    }

    #[test]
    fn test_envelope_without_version_is_invalid() {
        let err = InboundRequest::classify(json!({"id": 1, "method": "tools/list"})).unwrap_err();
        assert_eq!(err.code, RPC_INVALID_REQUEST);
        assert!(InboundRequest::classify(json!([1, 2])).is_err());
    }

    #[test]
    fn test_notifications() {
        let req = InboundRequest::classify(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .unwrap()
            .normalize();
        assert!(req.is_notification());
        assert_eq!(req.response_id(), Value::Null);
    }

    #[test]
    fn test_tool_result_shape() {
        let result = serde_json::to_value(CallToolResult::json(&json!({"a": 1}))).unwrap();
        assert_eq!(result["content"][0]["type"], "text");
        assert_eq!(result["isError"], false);
        assert_eq!(result["content"][0]["text"], "{\n  \"a\": 1\n}");
    }

    #[test]
    fn test_error_from_app_error() {
        let err = JsonRpcError::from(&AppError::validation("bad"));
        assert_eq!(err.code, -32602);
        let body = serde_json::to_value(JsonRpcResponse::failure(json!(1), err)).unwrap();
        assert!(body.get("result").is_none());
        assert_eq!(body["error"]["message"], "bad");
    }
}
