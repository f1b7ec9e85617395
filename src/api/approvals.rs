//! Out-of-band resolution of approval requests.
//!
//! Each action is reachable two ways: a link (`GET` with query parameters,
//! answered with an HTML page for the reviewer's browser) and a structured
//! call (`POST` with a JSON body, answered with JSON).

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::parse_body;
use crate::approval::{Resolution, Submission};
use crate::errors::AppError;
use crate::models::approval::{ApprovalRequest, ApprovalStatus, Payload};
use crate::render::{self, Tone};
use crate::AppState;

// ── Request DTOs ─────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ApproveParams {
    #[serde(default, alias = "request_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub approver: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectParams {
    #[serde(default, alias = "request_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub approver: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubmitBody {
    #[serde(default)]
    pub payload: Option<Payload>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub justification: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub status: Option<ApprovalStatus>,
}

fn required_id(id: Option<String>) -> Result<String, AppError> {
    id.map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::validation("missing request id"))
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

// ── Link-style (HTML) ────────────────────────────────────────

/// `GET /api/approve?id=&comments=&approver=`
pub async fn approve_link(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ApproveParams>,
) -> Response {
    let result: Result<_, AppError> = async {
        let id = required_id(params.id)?;
        state
            .approvals
            .approve(
                &id,
                Resolution {
                    approver: non_empty(params.approver).or(Some("link".to_string())),
                    note: non_empty(params.comments),
                },
            )
            .await
    }
    .await;

    match result {
        Ok(outcome) => {
            let created = serde_json::to_string_pretty(&outcome.created_entity).unwrap_or_default();
            let body = format!(
                "<p>The sales order was created in S/4HANA.</p>{}<h2>Created entity</h2><pre>{}</pre>",
                render::request_summary(&outcome.request),
                render::escape(&created)
            );
            Html(render::page(Tone::Success, "Request approved", &body)).into_response()
        }
        Err(e) => error_page(&e),
    }
}

/// `GET /api/reject?id=&reason=&approver=`
pub async fn reject_link(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RejectParams>,
) -> Response {
    let result: Result<_, AppError> = async {
        let id = required_id(params.id)?;
        state
            .approvals
            .reject(
                &id,
                Resolution {
                    approver: non_empty(params.approver).or(Some("link".to_string())),
                    // a bare link click carries no reason
                    note: non_empty(params.reason).or(Some("Rejected via link".to_string())),
                },
            )
            .await
    }
    .await;

    match result {
        Ok(request) => Html(render::page(
            Tone::Warning,
            "Request rejected",
            &render::request_summary(&request),
        ))
        .into_response(),
        Err(e) => error_page(&e),
    }
}

fn error_page(e: &AppError) -> Response {
    let (tone, title) = match e {
        AppError::AlreadyResolved { .. } => (Tone::Warning, "Already resolved"),
        AppError::NotFound { .. } => (Tone::Error, "Request not found"),
        _ => (Tone::Error, "Action failed"),
    };
    let body = format!("<p>{}</p>", render::escape(&e.public_message()));
    (e.status_code(), Html(render::page(tone, title, &body))).into_response()
}

// ── Structured (JSON) ────────────────────────────────────────

/// `POST /api/approve` with `{id, comments?, approver?}`
pub async fn approve_json(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let params: ApproveParams = parse_body(&body)?;
    let id = required_id(params.id)?;
    let outcome = state
        .approvals
        .approve(
            &id,
            Resolution {
                approver: non_empty(params.approver),
                note: non_empty(params.comments),
            },
        )
        .await?;

    Ok(Json(json!({
        "status": "approved",
        "request_id": outcome.request.id,
        "created_entity": outcome.created_entity,
        "request": outcome.request,
    })))
}

/// `POST /api/reject` with `{id, reason, approver?}`
pub async fn reject_json(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let params: RejectParams = parse_body(&body)?;
    let id = required_id(params.id)?;
    let request = state
        .approvals
        .reject(
            &id,
            Resolution {
                approver: non_empty(params.approver),
                note: non_empty(params.reason),
            },
        )
        .await?;

    Ok(Json(json!({
        "status": "rejected",
        "request_id": request.id,
        "request": request,
    })))
}

/// `POST /api/approvals`: submit a sales order for approval directly.
pub async fn submit(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let body: SubmitBody = parse_body(&body)?;
    let payload = body
        .payload
        .ok_or_else(|| AppError::validation("payload is required"))?;

    let request = state
        .approvals
        .submit(Submission {
            payload,
            created_by: body.created_by.unwrap_or_default(),
            justification: body.justification.unwrap_or_default(),
            source: body.source.unwrap_or_else(|| "api".to_string()),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(submitted(&state, &request))))
}

/// `GET /api/approvals[?status=pending]`
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Json<Value> {
    let requests: Vec<ApprovalRequest> = state
        .approvals
        .list()
        .await
        .into_iter()
        .filter(|r| params.status.map_or(true, |s| r.status == s))
        .collect();

    Json(json!({
        "count": requests.len(),
        "degraded": state.store.is_degraded(),
        "requests": requests,
    }))
}

/// `GET /api/approvals/:id`
pub async fn show(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApprovalRequest>, AppError> {
    Ok(Json(state.approvals.status(&id).await?))
}

/// Response body for a freshly submitted request.
pub(crate) fn submitted(state: &AppState, request: &ApprovalRequest) -> Value {
    json!({
        "status": "pending_approval",
        "request_id": request.id,
        "message": "Sales order creation requires approval. An approver has been notified.",
        "links": state.approvals.links(&request.id),
        "request": request,
    })
}
