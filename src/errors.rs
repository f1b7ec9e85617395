use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;

use crate::models::approval::ApprovalStatus;

// JSON-RPC error codes. The -32000..-32099 range is reserved for
// implementation-defined server errors.
pub const RPC_PARSE_ERROR: i64 = -32700;
pub const RPC_INVALID_REQUEST: i64 = -32600;
pub const RPC_METHOD_NOT_FOUND: i64 = -32601;
pub const RPC_INVALID_PARAMS: i64 = -32602;
pub const RPC_INTERNAL_ERROR: i64 = -32603;
pub const RPC_SECURITY_VIOLATION: i64 = -32003;
pub const RPC_NOT_FOUND: i64 = -32004;
pub const RPC_CONFLICT: i64 = -32009;
pub const RPC_BACKEND_ERROR: i64 = -32010;

/// Failures talking to S/4HANA. Carries the failure class so callers can
/// tell a missing credential from a slow backend from a rejected payload.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("S/4HANA connection error: {0}")]
    Network(String),

    #[error("missing SAP_USER or SAP_PASS environment variables")]
    NoCredentials,

    #[error(
        "S/4HANA timeout: the system took too long to process the {entity} request. \
         This may indicate the entity type is not supported for creation in this system."
    )]
    Timeout { entity: String },

    #[error("S/4HANA returned {status}: {message}")]
    RemoteRejected { status: u16, message: String },

    #[error("failed to fetch CSRF token from S/4HANA")]
    MissingWriteToken,

    #[error("unexpected S/4HANA response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    pub fn class(&self) -> &'static str {
        match self {
            BackendError::Network(_) => "network",
            BackendError::NoCredentials => "no_credentials",
            BackendError::Timeout { .. } => "timeout",
            BackendError::RemoteRejected { .. } => "remote_rejected",
            BackendError::MissingWriteToken => "missing_write_token",
            BackendError::InvalidResponse(_) => "invalid_response",
        }
    }

    fn http_status(&self) -> StatusCode {
        match self {
            BackendError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            BackendError::NoCredentials => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{message}")]
    Validation { message: String, data: Option<Value> },

    #[error("creating {entity} requires an approved request")]
    SecurityViolation { entity: String },

    #[error("approval request '{id}' not found")]
    NotFound { id: String },

    #[error("approval request '{id}' is already {status}")]
    AlreadyResolved { id: String, status: ApprovalStatus },

    #[error("approval request '{id}' already exists")]
    DuplicateId { id: String },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            data: None,
        }
    }

    pub fn validation_with(message: impl Into<String>, data: Value) -> Self {
        AppError::Validation {
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn rpc_code(&self) -> i64 {
        match self {
            AppError::Validation { .. } => RPC_INVALID_PARAMS,
            AppError::SecurityViolation { .. } => RPC_SECURITY_VIOLATION,
            AppError::NotFound { .. } => RPC_NOT_FOUND,
            AppError::AlreadyResolved { .. } | AppError::DuplicateId { .. } => RPC_CONFLICT,
            AppError::Backend(_) => RPC_BACKEND_ERROR,
            AppError::Internal(_) => RPC_INTERNAL_ERROR,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::SecurityViolation { .. } => StatusCode::FORBIDDEN,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::AlreadyResolved { .. } | AppError::DuplicateId { .. } => {
                StatusCode::CONFLICT
            }
            AppError::Backend(e) => e.http_status(),
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> (&'static str, &'static str) {
        match self {
            AppError::Validation { .. } => ("invalid_request_error", "validation_error"),
            AppError::SecurityViolation { .. } => ("permission_error", "security_violation"),
            AppError::NotFound { .. } => ("not_found_error", "approval_not_found"),
            AppError::AlreadyResolved { .. } => ("conflict_error", "already_resolved"),
            AppError::DuplicateId { .. } => ("conflict_error", "duplicate_id"),
            AppError::Backend(_) => ("backend_error", "backend_failed"),
            AppError::Internal(_) => ("internal_error", "internal_server_error"),
        }
    }

    /// Message safe to show to callers. Internal faults are logged, not leaked.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Internal(e) => {
                tracing::error!(error = ?e, "internal error");
                "internal server error".to_string()
            }
            other => other.to_string(),
        }
    }

    /// The `data` member of a JSON-RPC error object.
    pub fn rpc_data(&self) -> Option<Value> {
        match self {
            AppError::Validation { data, .. } => data.clone(),
            AppError::SecurityViolation { entity } => Some(json!({
                "entity": entity,
                "http_status": StatusCode::FORBIDDEN.as_u16(),
                "explanation": "sales orders are created only after a human approves the request; \
                                submit through create_s4hana_entity and wait for approval",
            })),
            AppError::AlreadyResolved { id, status } => Some(json!({
                "request_id": id,
                "status": status,
            })),
            AppError::Backend(e) => {
                let mut data = json!({ "class": e.class() });
                if let BackendError::RemoteRejected { status, message } = e {
                    data["backend_status"] = json!(status);
                    data["backend_message"] = json!(message);
                }
                Some(data)
            }
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (error_type, code) = self.kind();
        let msg = self.public_message();

        let mut error = json!({
            "message": msg,
            "type": error_type,
            "code": code,
        });
        if let Some(data) = self.rpc_data() {
            error["details"] = data;
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_maps_to_invalid_params() {
        let err = AppError::validation("Invalid entity 'foo'");
        assert_eq!(err.rpc_code(), -32602);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_security_violation_is_forbidden_with_explanation() {
        let err = AppError::SecurityViolation {
            entity: "salesorders".into(),
        };
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        let data = err.rpc_data().unwrap();
        assert_eq!(data["entity"], "salesorders");
        assert_eq!(data["http_status"], 403);
    }

    #[test]
    fn test_remote_rejection_carries_backend_status() {
        let err = AppError::from(BackendError::RemoteRejected {
            status: 400,
            message: "Property 'Foo' is invalid".into(),
        });
        let data = err.rpc_data().unwrap();
        assert_eq!(data["class"], "remote_rejected");
        assert_eq!(data["backend_status"], 400);
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_timeout_is_its_own_class() {
        let err = AppError::from(BackendError::Timeout {
            entity: "salesorderschedulelines".into(),
        });
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.rpc_data().unwrap()["class"], "timeout");
    }

    #[test]
    fn test_internal_error_message_is_generic() {
        let err = AppError::Internal(anyhow::anyhow!("disk on fire at /var/lib/x"));
        assert_eq!(err.public_message(), "internal server error");
        assert_eq!(err.rpc_code(), -32603);
    }
}
