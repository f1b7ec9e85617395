//! Flat REST endpoints for agent builders that cannot speak JSON-RPC
//! (Copilot Studio custom connectors and similar).

use std::sync::Arc;

use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::api::{approvals::submitted, parse_body};
use crate::approval::Submission;
use crate::catalog::PROTECTED_ENTITY;
use crate::errors::AppError;
use crate::AppState;

const DEFAULT_TOP: u32 = 10;
const MAX_TOP: u32 = 1000;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesOrderQuery {
    pub customer: Option<String>,
    pub top: Option<u32>,
    pub order_by: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartnerQuery {
    pub filter: Option<String>,
    pub top: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSalesOrder {
    pub sold_to_party: Option<String>,
    pub sales_order_type: Option<String>,
    #[serde(default)]
    pub items: Vec<Map<String, Value>>,
    pub justification: Option<String>,
}

fn top(requested: Option<u32>) -> Result<u32, AppError> {
    match requested.unwrap_or(DEFAULT_TOP) {
        t @ 1..=MAX_TOP => Ok(t),
        t => Err(AppError::validation(format!(
            "top must be between 1 and {}, got {}",
            MAX_TOP, t
        ))),
    }
}

/// OData string literals double embedded single quotes.
fn odata_literal(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', "''"))
}

/// `POST /api/query-sales-orders` with `{customer?, top?, orderBy?}`
pub async fn query_sales_orders(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let q: SalesOrderQuery = parse_body(&body)?;
    let order_by = q
        .order_by
        .filter(|o| !o.trim().is_empty())
        .unwrap_or_else(|| "TotalNetAmount desc".to_string());

    let mut query = format!("$top={}&$orderby={}", top(q.top)?, order_by);
    if let Some(customer) = q.customer.filter(|c| !c.trim().is_empty()) {
        query.push_str(&format!("&$filter=SoldToParty eq {}", odata_literal(customer.trim())));
    }

    let records = state.backend.fetch(PROTECTED_ENTITY, &query).await?;
    Ok(Json(json!({ "count": records.len(), "results": records })))
}

/// `POST /api/query-business-partners` with `{filter?, top?}`
pub async fn query_business_partners(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let q: PartnerQuery = parse_body(&body)?;
    let mut query = format!("$top={}", top(q.top)?);
    if let Some(filter) = q.filter.filter(|f| !f.trim().is_empty()) {
        query.push_str("&$filter=");
        query.push_str(filter.trim());
    }

    let records = state.backend.fetch("businesspartners", &query).await?;
    Ok(Json(json!({ "count": records.len(), "results": records })))
}

/// `POST /api/create-sales-order`: queued for approval, never created directly.
pub async fn create_sales_order(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let req: CreateSalesOrder = parse_body(&body)?;
    let sold_to = req
        .sold_to_party
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::validation("soldToParty is required"))?;

    let mut payload = Map::new();
    payload.insert("SoldToParty".into(), Value::String(sold_to));
    payload.insert(
        "SalesOrderType".into(),
        Value::String(req.sales_order_type.unwrap_or_else(|| "OR".to_string())),
    );
    payload.insert("TransactionCurrency".into(), Value::String("USD".into()));
    if !req.items.is_empty() {
        payload.insert(
            "to_Item".into(),
            Value::Array(req.items.into_iter().map(Value::Object).collect()),
        );
    }

    let request = state
        .approvals
        .submit(Submission {
            payload,
            created_by: "copilot-studio".to_string(),
            justification: req.justification.unwrap_or_default(),
            source: "copilot".to_string(),
        })
        .await?;

    Ok((StatusCode::ACCEPTED, Json(submitted(&state, &request))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_bounds() {
        assert_eq!(top(None).unwrap(), 10);
        assert_eq!(top(Some(1000)).unwrap(), 1000);
        assert!(top(Some(0)).is_err());
        assert!(top(Some(5000)).is_err());
    }

    #[test]
    fn test_odata_literal_escapes_quotes() {
        assert_eq!(odata_literal("O'Brien"), "'O''Brien'");
    }

    #[test]
    fn test_create_body_is_camel_case() {
        let req: CreateSalesOrder = serde_json::from_value(json!({
            "soldToParty": "10100001",
            "items": [{"Material": "TG11"}]
        }))
        .unwrap();
        assert_eq!(req.sold_to_party.as_deref(), Some("10100001"));
        assert_eq!(req.items.len(), 1);
    }
}
