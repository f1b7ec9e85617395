use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::AppState;

/// `GET /api/health`: 503 until backend credentials are configured.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let cfg = &state.config;
    let credentials = state.backend.has_credentials();
    let (status, code) = if credentials {
        ("healthy", StatusCode::OK)
    } else {
        ("degraded", StatusCode::SERVICE_UNAVAILABLE)
    };

    (
        code,
        Json(json!({
            "status": status,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION"),
            "sap_config": {
                "base_url": cfg.sap_base_url,
                "credentials_configured": credentials,
                "read_timeout_secs": cfg.read_timeout_secs,
                "write_timeout_secs": cfg.write_timeout_secs,
            },
            "store": {
                "kind": state.store.kind(),
                "degraded": state.store.is_degraded(),
                "cached_records": state.store.cache().len(),
            },
        })),
    )
}

/// `GET /metrics`: Prometheus text exposition.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}
