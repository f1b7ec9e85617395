//! Tool registry: the descriptors served by `tools/list` and the argument
//! validation applied before any tool runs.

use std::collections::HashMap;

use jsonschema::JSONSchema;
use serde_json::{json, Value};

use crate::catalog::EntityCatalog;
use crate::errors::AppError;
use crate::mcp::types::McpToolDef;

pub const QUERY_TOOL: &str = "query_s4hana";
pub const CREATE_TOOL: &str = "create_s4hana_entity";
pub const WORKFLOW_TOOL: &str = "check_and_create_sales_orders";
pub const STATUS_TOOL: &str = "check_approval_status";

/// Bumped whenever a tool's input schema changes shape.
const SCHEMA_VERSION: &str = "v1";

pub struct ToolRegistry {
    tools: Vec<McpToolDef>,
    validators: HashMap<String, JSONSchema>,
}

impl ToolRegistry {
    pub fn new(catalog: &EntityCatalog) -> anyhow::Result<Self> {
        let tools = definitions(catalog);
        let mut validators = HashMap::with_capacity(tools.len());
        for tool in &tools {
            let compiled = JSONSchema::compile(&tool.input_schema).map_err(|e| {
                anyhow::anyhow!("invalid input schema for tool {}: {}", tool.name, e)
            })?;
            validators.insert(tool.name.clone(), compiled);
        }
        Ok(Self { tools, validators })
    }

    pub fn definitions(&self) -> &[McpToolDef] {
        &self.tools
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.validators.contains_key(name)
    }

    /// Validate `arguments` for `tool`, returning them with the entity name
    /// lower-cased. Violations come back as one `Validation` error listing
    /// every message.
    pub fn validate(&self, tool: &str, arguments: Value) -> Result<Value, AppError> {
        let mut arguments = match arguments {
            Value::Null => json!({}),
            other => other,
        };
        if let Some(entity) = arguments.get_mut("entity") {
            if let Some(s) = entity.as_str() {
                *entity = Value::String(s.trim().to_lowercase());
            }
        }

        let Some(schema) = self.validators.get(tool) else {
            return Err(AppError::validation(format!("no schema for tool '{}'", tool)));
        };

        let violations: Vec<String> = match schema.validate(&arguments) {
            Ok(()) => Vec::new(),
            Err(errors) => errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{}: {}", path, e)
                    }
                })
                .collect(),
        };
        if !violations.is_empty() {
            return Err(AppError::validation_with(
                format!("Invalid arguments for {}: {}", tool, violations.join("; ")),
                json!({ "violations": violations }),
            ));
        }
        Ok(arguments)
    }
}

fn definitions(catalog: &EntityCatalog) -> Vec<McpToolDef> {
    let schema_id = |tool: &str| format!("urn:s4gate:tool:{}:{}", tool, SCHEMA_VERSION);

    vec![
        McpToolDef {
            name: QUERY_TOOL.to_string(),
            description: "Query S/4HANA entities (Business Partners: businesspartners, customers, suppliers | Sales Orders: salesorders, salesorderitems, salesorderheaderpartners)".to_string(),
            input_schema: json!({
                "$id": schema_id(QUERY_TOOL),
                "type": "object",
                "properties": {
                    "entity": {
                        "type": "string",
                        "description": "S/4HANA OData entity name",
                        "enum": catalog.readable_names(),
                    },
                    "query": {
                        "type": "string",
                        "description": "Optional OData query params ($filter, $select, $top, $skip, etc.)"
                    }
                },
                "required": ["entity"]
            }),
        },
        McpToolDef {
            name: CREATE_TOOL.to_string(),
            description: "Create S/4HANA entities (Sales Orders: salesorders, salesorderitems | Business Partners: businesspartneraddresses, businesspartnercontacts). Sales orders are queued for human approval and return a request id.".to_string(),
            input_schema: json!({
                "$id": schema_id(CREATE_TOOL),
                "type": "object",
                "properties": {
                    "entity": {
                        "type": "string",
                        "enum": catalog.creatable_names(),
                    },
                    "payload": {
                        "type": "object",
                        "description": "Entity data to create"
                    },
                    "justification": {
                        "type": "string",
                        "description": "Why this record is needed; shown to the approver"
                    }
                },
                "required": ["entity", "payload"]
            }),
        },
        McpToolDef {
            name: WORKFLOW_TOOL.to_string(),
            description: "Check sales orders and create line items if lacking".to_string(),
            input_schema: json!({
                "$id": schema_id(WORKFLOW_TOOL),
                "type": "object",
                "properties": {
                    "customer_filter": {
                        "type": "string",
                        "description": "Optional filter for customer (e.g. \"SoldToParty eq '10100001'\")"
                    },
                    "min_orders": {
                        "type": "integer",
                        "minimum": 0,
                        "description": "Minimum number of orders expected",
                        "default": 1
                    },
                    "line_items_to_create": {
                        "type": "array",
                        "description": "Sales order line items to create if lacking",
                        "items": {"type": "object"}
                    }
                },
                "required": ["line_items_to_create"]
            }),
        },
        McpToolDef {
            name: STATUS_TOOL.to_string(),
            description: "Check the status of a sales order approval request".to_string(),
            input_schema: json!({
                "$id": schema_id(STATUS_TOOL),
                "type": "object",
                "properties": {
                    "request_id": {
                        "type": "string",
                        "minLength": 1,
                        "description": "Approval request id returned by create_s4hana_entity"
                    }
                },
                "required": ["request_id"]
            }),
        },
    ]
}
