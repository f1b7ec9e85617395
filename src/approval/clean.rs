//! Payload cleaning applied right before an approved sales order is posted.
//!
//! Agents tend to send extra keys (`justification`, notes, camelCase
//! duplicates). `A_SalesOrder` rejects unknown properties, so only
//! whitelisted fields survive, and date fields are rewritten into the
//! OData v2 JSON encoding `/Date(<epoch millis>)/`.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};

use crate::errors::AppError;
use crate::models::approval::Payload;

const HEADER_FIELDS: &[&str] = &[
    "SalesOrderType",
    "SalesOrganization",
    "DistributionChannel",
    "OrganizationDivision",
    "SalesGroup",
    "SalesOffice",
    "SoldToParty",
    "PurchaseOrderByCustomer",
    "CustomerPurchaseOrderType",
    "CustomerPurchaseOrderDate",
    "SalesOrderDate",
    "TransactionCurrency",
    "RequestedDeliveryDate",
    "ShippingCondition",
    "CompleteDeliveryIsDefined",
    "IncotermsClassification",
    "IncotermsLocation1",
    "CustomerPaymentTerms",
    "PaymentMethod",
    "PricingDate",
    "HeaderBillingBlockReason",
    "DeliveryBlockReason",
];

const ITEM_FIELDS: &[&str] = &[
    "SalesOrderItem",
    "HigherLevelItem",
    "SalesOrderItemCategory",
    "SalesOrderItemText",
    "PurchaseOrderByCustomer",
    "Material",
    "MaterialByCustomer",
    "PricingDate",
    "RequestedQuantity",
    "RequestedQuantityUnit",
    "TransactionCurrency",
    "NetAmount",
    "MaterialGroup",
    "Batch",
    "ProductionPlant",
    "StorageLocation",
    "DeliveryGroup",
    "ShippingPoint",
    "ShippingType",
    "DeliveryPriority",
    "IncotermsClassification",
    "IncotermsLocation1",
    "CustomerPaymentTerms",
    "ItemBillingBlockReason",
];

const PARTNER_FIELDS: &[&str] = &[
    "PartnerFunction",
    "Customer",
    "Supplier",
    "Personnel",
    "ContactPerson",
];

const TEXT_FIELDS: &[&str] = &["Language", "LongTextID", "LongText"];

const DATE_FIELDS: &[&str] = &[
    "SalesOrderDate",
    "RequestedDeliveryDate",
    "CustomerPurchaseOrderDate",
    "PricingDate",
];

/// Navigation properties allowed on the header, with their own whitelists.
const NAVIGATIONS: &[(&str, &[&str])] = &[
    ("to_Item", ITEM_FIELDS),
    ("to_Partner", PARTNER_FIELDS),
    ("to_Text", TEXT_FIELDS),
];

/// Clean a sales order header payload (and its deep-insert children).
pub fn clean_sales_order(payload: &Payload) -> Result<Payload, AppError> {
    let mut cleaned = clean_fields(payload, HEADER_FIELDS, "")?;

    for (nav, fields) in NAVIGATIONS {
        if let Some(children) = payload.get(*nav) {
            if let Some(value) = clean_navigation(nav, children, fields)? {
                cleaned.insert(nav.to_string(), value);
            }
        }
    }

    let stripped: Vec<&String> = payload
        .keys()
        .filter(|k| !cleaned.contains_key(*k) && !payload[*k].is_null())
        .collect();
    if !stripped.is_empty() {
        tracing::debug!(?stripped, "stripped fields unknown to A_SalesOrder");
    }
    Ok(cleaned)
}

fn clean_fields(record: &Payload, whitelist: &[&str], context: &str) -> Result<Payload, AppError> {
    let mut out = Map::new();
    for (key, value) in record {
        if value.is_null() || !whitelist.contains(&key.as_str()) {
            continue;
        }
        let value = if DATE_FIELDS.contains(&key.as_str()) {
            encode_date(&format!("{}{}", context, key), value)?
        } else {
            value.clone()
        };
        out.insert(key.clone(), value);
    }
    Ok(out)
}

/// Deep-insert children arrive either as a bare array or as `{results: [...]}`;
/// the shape is preserved.
fn clean_navigation(nav: &str, children: &Value, fields: &[&str]) -> Result<Option<Value>, AppError> {
    let (items, wrapped) = match children {
        Value::Array(items) => (items, false),
        Value::Object(obj) => match obj.get("results") {
            Some(Value::Array(items)) => (items, true),
            _ => {
                return Err(AppError::validation(format!(
                    "{} must be an array or an object with a 'results' array",
                    nav
                )))
            }
        },
        Value::Null => return Ok(None),
        _ => {
            return Err(AppError::validation(format!(
                "{} must be an array of objects",
                nav
            )))
        }
    };

    let mut cleaned = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let obj = item.as_object().ok_or_else(|| {
            AppError::validation(format!("{}[{}] must be an object", nav, idx))
        })?;
        let context = format!("{}[{}].", nav, idx);
        cleaned.push(Value::Object(clean_fields(obj, fields, &context)?));
    }

    Ok(Some(if wrapped {
        serde_json::json!({ "results": cleaned })
    } else {
        Value::Array(cleaned)
    }))
}

/// `2024-01-01`, RFC 3339 or naive ISO datetimes become `/Date(millis)/`.
/// Values already in that encoding pass through.
pub fn encode_date(field: &str, value: &Value) -> Result<Value, AppError> {
    let raw = value.as_str().ok_or_else(|| {
        AppError::validation(format!("{} must be a date string", field))
    })?;
    let raw = raw.trim();

    if raw.starts_with("/Date(") && raw.ends_with(")/") {
        return Ok(Value::String(raw.to_string()));
    }

    let millis = if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp_millis())
    } else if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        Some(dt.timestamp_millis())
    } else if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        Some(dt.and_utc().timestamp_millis())
    } else {
        None
    };

    millis
        .map(|ms| Value::String(format!("/Date({})/", ms)))
        .ok_or_else(|| {
            AppError::validation(format!(
                "{} has unsupported date '{}' (expected YYYY-MM-DD)",
                field, raw
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(v: Value) -> Payload {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_strips_unknown_fields_and_encodes_dates() {
        let input = payload(json!({
            "SoldToParty": "10100001",
            "SalesOrderType": "OR",
            "justification": "test",
            "RequestedDeliveryDate": "2024-01-01",
            "Notes": null
        }));
        let cleaned = clean_sales_order(&input).unwrap();
        assert_eq!(
            Value::Object(cleaned),
            json!({
                "SoldToParty": "10100001",
                "SalesOrderType": "OR",
                "RequestedDeliveryDate": "/Date(1704067200000)/"
            })
        );
    }

    #[test]
    fn test_input_payload_is_not_mutated() {
        let input = payload(json!({"SoldToParty": "1", "justification": "x"}));
        let before = input.clone();
        let _ = clean_sales_order(&input).unwrap();
        assert_eq!(input, before);
    }

    #[test]
    fn test_items_are_cleaned_and_shape_preserved() {
        let input = payload(json!({
            "SoldToParty": "10100001",
            "to_Item": {"results": [
                {"Material": "TG11", "RequestedQuantity": "5", "comment": "rush", "PricingDate": "2024-03-01T00:00:00Z"}
            ]},
            "to_Partner": [{"PartnerFunction": "SH", "Customer": "10100002", "extra": 1}]
        }));
        let cleaned = clean_sales_order(&input).unwrap();
        assert_eq!(
            cleaned["to_Item"],
            json!({"results": [
                {"Material": "TG11", "RequestedQuantity": "5", "PricingDate": "/Date(1709251200000)/"}
            ]})
        );
        assert_eq!(cleaned["to_Partner"], json!([{"PartnerFunction": "SH", "Customer": "10100002"}]));
    }

    #[test]
    fn test_encoded_dates_pass_through() {
        let v = encode_date("SalesOrderDate", &json!("/Date(1704067200000)/")).unwrap();
        assert_eq!(v, json!("/Date(1704067200000)/"));
    }

    #[test]
    fn test_bad_date_is_validation_error() {
        let err = encode_date("SalesOrderDate", &json!("01/02/2024")).unwrap_err();
        assert_eq!(err.rpc_code(), -32602);
        assert!(encode_date("PricingDate", &json!(20240101)).is_err());
    }

    #[test]
    fn test_malformed_navigation_is_rejected() {
        let input = payload(json!({"SoldToParty": "1", "to_Item": "TG11"}));
        assert!(clean_sales_order(&input).is_err());
    }
}
