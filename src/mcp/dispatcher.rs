//! JSON-RPC method dispatch for the MCP endpoint.
//!
//! Reads go straight to the OData client. Creates of the protected entity
//! are turned into approval submissions; every other creatable entity is
//! posted directly. Every outcome, including a panic inside a handler,
//! becomes a well-formed JSON-RPC response.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::http::StatusCode;
use futures::FutureExt;
use serde_json::{json, Map, Value};

use crate::approval::{ApprovalService, Submission};
use crate::backend::ODataClient;
use crate::catalog::PROTECTED_ENTITY;
use crate::errors::{
    AppError, RPC_INTERNAL_ERROR, RPC_INVALID_PARAMS, RPC_METHOD_NOT_FOUND, RPC_PARSE_ERROR,
    RPC_SECURITY_VIOLATION,
};
use crate::metrics::Metrics;
use crate::mcp::tools::{ToolRegistry, CREATE_TOOL, QUERY_TOOL, STATUS_TOOL, WORKFLOW_TOOL};
use crate::mcp::types::{
    CallToolParams, CallToolResult, InboundRequest, JsonRpcError, JsonRpcResponse, RpcRequest,
    PROTOCOL_VERSION,
};

pub const SUPPORTED_METHODS: &[&str] = &["initialize", "initialized", "tools/list", "tools/call"];

const SERVER_NAME: &str = "S/4HANA MCP Server";
/// Orders fetched by the workflow tool before comparing against the minimum.
const WORKFLOW_SCAN_LIMIT: usize = 100;
const WORKFLOW_PREVIEW: usize = 5;
/// Item entity the workflow tool creates when orders are lacking.
const WORKFLOW_ITEM_ENTITY: &str = "salesorderitems";

/// What the HTTP layer should send back.
#[derive(Debug)]
pub enum DispatchOutcome {
    Reply {
        status: StatusCode,
        body: JsonRpcResponse,
    },
    /// Notification accepted; 202 with no body.
    Accepted,
}

impl DispatchOutcome {
    fn reply(id: Value, result: Result<Value, JsonRpcError>) -> Self {
        match result {
            Ok(value) => DispatchOutcome::Reply {
                status: StatusCode::OK,
                body: JsonRpcResponse::success(id, value),
            },
            Err(error) => DispatchOutcome::Reply {
                // a blocked protected write is also an HTTP-level refusal
                status: if error.code == RPC_SECURITY_VIOLATION {
                    StatusCode::FORBIDDEN
                } else {
                    StatusCode::OK
                },
                body: JsonRpcResponse::failure(id, error),
            },
        }
    }
}

pub struct Dispatcher {
    backend: Arc<ODataClient>,
    approvals: Arc<ApprovalService>,
    tools: ToolRegistry,
    metrics: Arc<Metrics>,
}

impl Dispatcher {
    pub fn new(
        backend: Arc<ODataClient>,
        approvals: Arc<ApprovalService>,
        metrics: Arc<Metrics>,
    ) -> anyhow::Result<Self> {
        let tools = ToolRegistry::new(backend.catalog())?;
        Ok(Self {
            backend,
            approvals,
            tools,
            metrics,
        })
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Entry point for raw HTTP bodies.
    pub async fn handle_body(&self, body: &[u8]) -> DispatchOutcome {
        let parsed: Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable JSON-RPC body");
                self.metrics.record_rpc("invalid", "parse_error");
                return DispatchOutcome::reply(
                    Value::Null,
                    Err(JsonRpcError::new(RPC_PARSE_ERROR, format!("Parse error: {}", e))),
                );
            }
        };

        let id_hint = parsed.get("id").cloned().unwrap_or(Value::Null);
        match InboundRequest::classify(parsed) {
            Ok(inbound) => {
                if matches!(inbound, InboundRequest::Flattened(_)) {
                    tracing::debug!("normalizing flattened request shape");
                }
                self.dispatch(inbound.normalize()).await
            }
            Err(error) => {
                self.metrics.record_rpc("invalid", "invalid_request");
                DispatchOutcome::reply(id_hint, Err(error))
            }
        }
    }

    /// Dispatch a canonical request. Panics inside handlers are caught here.
    pub async fn dispatch(&self, req: RpcRequest) -> DispatchOutcome {
        if req.is_notification() {
            tracing::debug!(method = %req.method, "notification received");
            self.metrics.record_rpc(&req.method, "ok");
            return DispatchOutcome::Accepted;
        }

        tracing::info!(method = %req.method, id = %req.response_id(), "rpc request");
        let result = guarded(&req.method, self.route(&req)).await;

        let outcome = if result.is_ok() { "ok" } else { "error" };
        self.metrics.record_rpc(&req.method, outcome);
        DispatchOutcome::reply(req.response_id(), result)
    }

    async fn route(&self, req: &RpcRequest) -> Result<Value, JsonRpcError> {
        match req.method.as_str() {
            "initialize" => Ok(initialize_result()),
            "tools/list" => Ok(json!({ "tools": self.tools.definitions() })),
            "tools/call" => self.call_tool(&req.params).await,
            other => Err(JsonRpcError::new(
                RPC_METHOD_NOT_FOUND,
                format!("Method not found: {}", other),
            )
            .with_data(json!({ "supported_methods": SUPPORTED_METHODS }))),
        }
    }

    async fn call_tool(&self, params: &Value) -> Result<Value, JsonRpcError> {
        let params: CallToolParams = serde_json::from_value(params.clone()).map_err(|e| {
            JsonRpcError::new(RPC_INVALID_PARAMS, format!("Invalid params: {}", e))
        })?;
        let name = params
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| JsonRpcError::new(RPC_INVALID_PARAMS, "Invalid params: missing tool name"))?;

        if !self.tools.contains(&name) {
            self.metrics.record_tool("unknown", "error");
            return Err(JsonRpcError::new(
                RPC_METHOD_NOT_FOUND,
                format!("Unknown tool: {}", name),
            )
            .with_data(json!({ "available_tools": self.tools.names() })));
        }

        let result = self.run_tool(&name, params.arguments.unwrap_or(Value::Null)).await;
        match &result {
            Ok(_) => self.metrics.record_tool(&name, "ok"),
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "tool call failed");
                self.metrics.record_tool(&name, "error");
            }
        }
        result
            .map(|value| json!(CallToolResult::json(&value)))
            .map_err(|e| JsonRpcError::from(&e))
    }

    async fn run_tool(&self, name: &str, arguments: Value) -> Result<Value, AppError> {
        let args = self.tools.validate(name, arguments)?;
        match name {
            QUERY_TOOL => {
                let entity = str_arg(&args, "entity");
                let records = self.backend.fetch(entity, str_arg(&args, "query")).await?;
                Ok(Value::Array(records.into_iter().map(Value::Object).collect()))
            }
            CREATE_TOOL => {
                let payload = object_arg(&args, "payload");
                let justification = match str_arg(&args, "justification") {
                    "" => payload
                        .get("justification")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    j => j.to_string(),
                };
                self.create_entity(str_arg(&args, "entity"), payload, justification)
                    .await
            }
            WORKFLOW_TOOL => self.run_workflow(&args).await,
            STATUS_TOOL => {
                let record = self.approvals.status(str_arg(&args, "request_id")).await?;
                Ok(json!(record))
            }
            other => Err(AppError::Internal(anyhow::anyhow!(
                "tool {} registered without a handler",
                other
            ))),
        }
    }

    /// Create routing shared by the create tool and the workflow tool.
    async fn create_entity(
        &self,
        entity: &str,
        payload: Map<String, Value>,
        justification: String,
    ) -> Result<Value, AppError> {
        if self.backend.catalog().requires_approval(entity) {
            let request = self
                .approvals
                .submit(Submission {
                    payload,
                    created_by: "mcp-client".to_string(),
                    justification,
                    source: "mcp".to_string(),
                })
                .await?;
            let links = self.approvals.links(&request.id);
            return Ok(json!({
                "status": "pending_approval",
                "request_id": request.id,
                "entity": PROTECTED_ENTITY,
                "message": format!(
                    "Sales order creation requires approval. Request {} is pending; check it with {}.",
                    request.id, STATUS_TOOL
                ),
                "links": links,
            }));
        }
        self.backend.create(entity, &payload, false).await
    }

    async fn run_workflow(&self, args: &Value) -> Result<Value, AppError> {
        let min_orders = args.get("min_orders").and_then(Value::as_u64).unwrap_or(1) as usize;
        let mut query = format!("$top={}", WORKFLOW_SCAN_LIMIT);
        let filter = str_arg(args, "customer_filter").trim();
        if !filter.is_empty() {
            query.push_str("&$filter=");
            query.push_str(filter);
        }

        let orders = self.backend.fetch(PROTECTED_ENTITY, &query).await?;
        let count = orders.len();
        let preview: Vec<Value> = orders
            .into_iter()
            .take(WORKFLOW_PREVIEW)
            .map(Value::Object)
            .collect();

        let mut result = json!({
            "step1_query": {
                "existing_orders_count": count,
                "min_required": min_orders,
                "orders": preview,
            }
        });

        if count >= min_orders {
            result["step2_create"] = json!({
                "action": "no_creation_needed",
                "reason": format!("Found {} orders >= {} minimum", count, min_orders),
            });
            return Ok(result);
        }

        tracing::info!(count, min_orders, "too few sales orders; creating line items");
        let items = args
            .get("line_items_to_create")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        // sequential: per-item results keep the caller's order
        let mut results = Vec::with_capacity(items.len());
        let mut created = 0;
        for item in items {
            let payload = match item {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            match self.create_entity(WORKFLOW_ITEM_ENTITY, payload, String::new()).await {
                Ok(value) => {
                    created += 1;
                    results.push(value);
                }
                Err(e) => results.push(json!({
                    "error": format!("Failed to create: {}", e.public_message()),
                    "details": JsonRpcError::from(&e).data,
                })),
            }
        }

        result["step2_create"] = json!({
            "action": "created_line_items",
            "items_created": created,
            "results": results,
        });
        Ok(result)
    }
}

/// Run a handler, turning a panic into a -32603 error.
async fn guarded<F>(method: &str, handler: F) -> Result<Value, JsonRpcError>
where
    F: Future<Output = Result<Value, JsonRpcError>>,
{
    match AssertUnwindSafe(handler).catch_unwind().await {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(method = %method, "handler panicked");
            Err(JsonRpcError::new(RPC_INTERNAL_ERROR, "Internal error"))
        }
    }
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": { "listChanged": false }
        },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}

fn str_arg<'a>(args: &'a Value, key: &str) -> &'a str {
    args.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn object_arg(args: &Value, key: &str) -> Map<String, Value> {
    args.get(key)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::HookSet;
    use crate::backend::Credentials;
    use crate::catalog::EntityCatalog;
    use crate::store::approval_store::ApprovalStore;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn dispatcher(base: &str) -> Dispatcher {
        let catalog = Arc::new(EntityCatalog::builtin(base));
        let backend = Arc::new(
            ODataClient::new(
                catalog,
                Some(Credentials {
                    user: "u".into(),
                    password: "p".into(),
                }),
                Duration::from_secs(5),
                Duration::from_secs(5),
                false,
            )
            .unwrap(),
        );
        let approvals = Arc::new(ApprovalService::new(
            Arc::new(ApprovalStore::in_memory()),
            backend.clone(),
            HookSet::new(),
            "http://gw",
        ));
        Dispatcher::new(backend, approvals, Arc::new(Metrics::new().unwrap())).unwrap()
    }

    async fn call(d: &Dispatcher, body: Value) -> (StatusCode, Value) {
        match d.handle_body(body.to_string().as_bytes()).await {
            DispatchOutcome::Reply { status, body } => (status, serde_json::to_value(body).unwrap()),
            DispatchOutcome::Accepted => (StatusCode::ACCEPTED, Value::Null),
        }
    }

    fn tool_text(reply: &Value) -> Value {
        serde_json::from_str(reply["result"]["content"][0]["text"].as_str().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_and_list() {
        let d = dispatcher("http://127.0.0.1:9");
        let (_, reply) = call(&d, json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"})).await;
        assert_eq!(reply["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(reply["result"]["capabilities"]["tools"]["listChanged"], false);

        let (_, reply) = call(&d, json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"})).await;
        assert_eq!(reply["result"]["tools"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_parse_error_and_unknown_method() {
        let d = dispatcher("http://127.0.0.1:9");
        let outcome = d.handle_body(b"{not json").await;
        let DispatchOutcome::Reply { body, .. } = outcome else {
            panic!("expected reply");
        };
        assert_eq!(body.error.unwrap().code, RPC_PARSE_ERROR);

        let (_, reply) = call(&d, json!({"jsonrpc": "2.0", "id": 3, "method": "resources/list"})).await;
        assert_eq!(reply["error"]["code"], -32601);
        assert_eq!(reply["error"]["data"]["supported_methods"][3], "tools/call");
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_internal_error() {
        let result = guarded("tools/call", async {
            if true {
                panic!("bug in handler");
            }
            Ok(Value::Null)
        })
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.code, RPC_INTERNAL_ERROR);

        let DispatchOutcome::Reply { status, body } = DispatchOutcome::reply(json!(11), Err(err)) else {
            panic!("expected reply");
        };
        assert_eq!(status, StatusCode::OK);
        let body = serde_json::to_value(body).unwrap();
        assert_eq!(body["id"], 11);
        assert_eq!(body["error"]["code"], -32603);
        assert_eq!(body["error"]["message"], "Internal error");
        assert!(body.get("result").is_none());
    }

    #[tokio::test]
    async fn test_unknown_tool_lists_available_tools() {
        let d = dispatcher("http://127.0.0.1:9");
        let (status, reply) = call(
            &d,
            json!({"jsonrpc": "2.0", "id": 4, "method": "tools/call", "params": {"name": "drop_tables"}}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["id"], 4);
        assert_eq!(reply["error"]["code"], -32601);
        let tools = reply["error"]["data"]["available_tools"].as_array().unwrap();
        assert!(tools.contains(&json!("query_s4hana")));
        assert!(tools.contains(&json!("check_approval_status")));
    }

    #[tokio::test]
    async fn test_missing_tool_name_is_invalid_params() {
        let d = dispatcher("http://127.0.0.1:9");
        let (_, reply) = call(&d, json!({"jsonrpc": "2.0", "id": 5, "method": "tools/call", "params": {}})).await;
        assert_eq!(reply["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn test_query_invalid_entity_never_hits_backend() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let d = dispatcher(&server.uri());

        let (_, reply) = call(
            &d,
            json!({"tool_name": "query_s4hana", "entity": "invoices"}),
        )
        .await;
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn test_protected_create_becomes_approval_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let d = dispatcher(&server.uri());

        let (status, reply) = call(
            &d,
            json!({"jsonrpc": "2.0", "id": 6, "method": "tools/call", "params": {
                "name": "create_s4hana_entity",
                "arguments": {"entity": "SalesOrders", "payload": {"SoldToParty": "10100001", "justification": "test"}}
            }}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let result = tool_text(&reply);
        assert_eq!(result["status"], "pending_approval");
        let id = result["request_id"].as_str().unwrap().to_string();

        let (_, reply) = call(
            &d,
            json!({"jsonrpc": "2.0", "id": 7, "method": "tools/call", "params": {
                "name": "check_approval_status", "arguments": {"request_id": id}
            }}),
        )
        .await;
        let record = tool_text(&reply);
        assert_eq!(record["status"], "pending");
        assert_eq!(record["justification"], "test");
        assert_eq!(record["payload"]["SoldToParty"], "10100001");
    }

    #[tokio::test]
    async fn test_workflow_skips_creation_when_enough_orders() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sap/opu/odata/sap/API_SALES_ORDER_SRV/A_SalesOrder"))
            .and(query_param("$top", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "d": {"results": [{"SalesOrder": "1"}, {"SalesOrder": "2"}]}
            })))
            .expect(1)
            .mount(&server)
            .await;
        let d = dispatcher(&server.uri());

        let (_, reply) = call(
            &d,
            json!({"tool_name": "check_and_create_sales_orders", "min_orders": 2, "line_items_to_create": [{"Material": "TG11"}]}),
        )
        .await;
        let result = tool_text(&reply);
        assert_eq!(result["step1_query"]["existing_orders_count"], 2);
        assert_eq!(result["step2_create"]["action"], "no_creation_needed");
    }

    #[tokio::test]
    async fn test_workflow_creates_items_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sap/opu/odata/sap/API_SALES_ORDER_SRV/A_SalesOrder"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"d": {"results": []}})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sap/opu/odata/sap/API_SALES_ORDER_SRV/A_SalesOrderItem"))
            .respond_with(ResponseTemplate::new(200).insert_header("x-csrf-token", "t"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/sap/opu/odata/sap/API_SALES_ORDER_SRV/A_SalesOrderItem"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"d": {"SalesOrderItem": "10"}})),
            )
            .expect(2)
            .mount(&server)
            .await;
        let d = dispatcher(&server.uri());

        let (_, reply) = call(
            &d,
            json!({"tool_name": "check_and_create_sales_orders",
                   "line_items_to_create": [{"Material": "A"}, {"Material": "B"}]}),
        )
        .await;
        let result = tool_text(&reply);
        assert_eq!(result["step2_create"]["action"], "created_line_items");
        assert_eq!(result["step2_create"]["items_created"], 2);
    }

    #[tokio::test]
    async fn test_notification_is_accepted() {
        let d = dispatcher("http://127.0.0.1:9");
        let (status, _) = call(&d, json!({"jsonrpc": "2.0", "method": "initialized"})).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }
}
