//! Flatten OData JSON payloads into plain field maps.
//!
//! S/4HANA answers collection reads with `{"d": {"results": [...]}}`, but a
//! key read (or some gateways) returns `{"d": {...}}` or even a bare object.
//! All shapes normalize to a one-or-more element list.

use serde_json::{Map, Value};

use crate::errors::BackendError;

pub type Record = Map<String, Value>;

pub fn normalize_records(body: Value) -> Result<Vec<Record>, BackendError> {
    let inner = match body {
        Value::Object(mut obj) if obj.contains_key("d") => obj.remove("d").unwrap_or(Value::Null),
        Value::Object(mut obj) if matches!(obj.get("value"), Some(Value::Array(_))) => {
            obj.remove("value").unwrap_or(Value::Null)
        }
        other => other,
    };

    let items = match inner {
        Value::Object(mut obj) => match obj.remove("results") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                obj.insert("results".to_string(), other);
                vec![Value::Object(obj)]
            }
            None => vec![Value::Object(obj)],
        },
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => {
            return Err(BackendError::InvalidResponse(format!(
                "expected an object or a list of records, got {}",
                type_name(&other)
            )))
        }
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::Object(record) => Ok(flatten_record(record)),
            other => Err(BackendError::InvalidResponse(format!(
                "expected a record object, got {}",
                type_name(&other)
            ))),
        })
        .collect()
}

/// Unwrap the `d` envelope of a single-entity response (create results).
pub fn unwrap_entity(body: Value) -> Value {
    match body {
        Value::Object(mut obj) if obj.contains_key("d") => match obj.remove("d") {
            Some(Value::Object(record)) => Value::Object(flatten_record(record)),
            Some(other) => other,
            None => Value::Null,
        },
        Value::Object(record) => Value::Object(flatten_record(record)),
        other => other,
    }
}

/// Drop OData bookkeeping: `__metadata` and unexpanded navigation links.
fn flatten_record(mut record: Record) -> Record {
    record.remove("__metadata");
    record.retain(|_, v| !is_deferred(v));
    record
}

fn is_deferred(v: &Value) -> bool {
    matches!(v, Value::Object(o) if o.len() == 1 && o.contains_key("__deferred"))
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
