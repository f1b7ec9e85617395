use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use serde::de::DeserializeOwned;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::errors::AppError;
use crate::AppState;

pub mod approvals;
pub mod copilot;
pub mod health;
pub mod mcp;

/// Largest request body accepted on any route.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the full HTTP surface. Every route lives under `/api` except the
/// liveness and metrics probes.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/mcp", post(mcp::rpc))
        .route(
            "/sse",
            get(mcp::sse_ready)
                .post(mcp::rpc)
                .put(mcp::rpc)
                .patch(mcp::rpc),
        )
        .route("/tools", get(mcp::tools_discovery))
        .route(
            "/approve",
            get(approvals::approve_link).post(approvals::approve_json),
        )
        .route(
            "/reject",
            get(approvals::reject_link).post(approvals::reject_json),
        )
        .route(
            "/approvals",
            get(approvals::list).post(approvals::submit),
        )
        .route("/approvals/:id", get(approvals::show))
        .route("/health", get(health::health))
        .route("/query-sales-orders", post(copilot::query_sales_orders))
        .route(
            "/query-business-partners",
            post(copilot::query_business_partners),
        )
        .route("/create-sales-order", post(copilot::create_sales_order));

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/metrics", get(health::metrics))
        .nest("/api", api)
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .layer(middleware::from_fn(request_id_middleware))
}

/// Agent platforms call from arbitrary origins; every response is open.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("ocp-apim-subscription-key"),
        ])
}

/// Middleware: injects a unique X-Request-Id into every response so clients
/// can correlate errors with gateway logs.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!("request", request_id = %req_id);

    let mut resp = next.run(req).instrument(span).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp.headers_mut().insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    resp
}

/// Parse an optional JSON body; an empty body yields `T::default()`.
pub(crate) fn parse_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::validation(format!("invalid JSON body: {}", e)))
}
