use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The intended entity to create, field name → value.
pub type Payload = Map<String, Value>;

static ID_CHARSET: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,80}$").unwrap());

/// Ids double as object-store keys; anything outside this charset is
/// treated as unknown rather than turned into a path.
pub fn is_valid_id(id: &str) -> bool {
    ID_CHARSET.is_match(id)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalRequest {
    pub id: String,
    pub status: ApprovalStatus,
    /// Logical entity the approved create targets.
    pub entity: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub payload: Payload,
    #[serde(default)]
    pub justification: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub approver: Option<String>,
    #[serde(default)]
    pub approver_comments: Option<String>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    /// Record returned by S/4HANA for the approved create.
    #[serde(default)]
    pub created_entity: Option<Value>,
    /// Error of the most recent failed approve attempt.
    #[serde(default)]
    pub last_error: Option<String>,
}

impl ApprovalRequest {
    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        })
    }
}

/// Partial update applied by `ApprovalStore::update`. `None` leaves the
/// field untouched.
#[derive(Debug, Default, Clone)]
pub struct ApprovalPatch {
    pub status: Option<ApprovalStatus>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub approver: Option<String>,
    pub approver_comments: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_entity: Option<Value>,
    pub last_error: Option<String>,
}

impl ApprovalPatch {
    pub fn apply(self, record: &mut ApprovalRequest) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if self.approved_at.is_some() {
            record.approved_at = self.approved_at;
        }
        if self.rejected_at.is_some() {
            record.rejected_at = self.rejected_at;
        }
        if self.approver.is_some() {
            record.approver = self.approver;
        }
        if self.approver_comments.is_some() {
            record.approver_comments = self.approver_comments;
        }
        if self.rejection_reason.is_some() {
            record.rejection_reason = self.rejection_reason;
        }
        if self.created_entity.is_some() {
            record.created_entity = self.created_entity;
        }
        if self.last_error.is_some() {
            record.last_error = self.last_error;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> ApprovalRequest {
        ApprovalRequest {
            id: "REQ-20240101120000-abc123".into(),
            status: ApprovalStatus::Pending,
            entity: "salesorders".into(),
            created_at: Utc::now(),
            created_by: "copilot".into(),
            payload: Map::new(),
            justification: String::new(),
            source: "mcp".into(),
            approved_at: None,
            rejected_at: None,
            approver: None,
            approver_comments: None,
            rejection_reason: None,
            created_entity: None,
            last_error: None,
        }
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_value(ApprovalStatus::Rejected).unwrap();
        assert_eq!(json, "rejected");
        assert_eq!(ApprovalStatus::Approved.to_string(), "approved");
    }

    #[test]
    fn test_patch_only_touches_set_fields() {
        let mut record = pending();
        record.approver_comments = Some("keep me".into());
        ApprovalPatch {
            last_error: Some("timeout".into()),
            ..Default::default()
        }
        .apply(&mut record);
        assert_eq!(record.status, ApprovalStatus::Pending);
        assert_eq!(record.approver_comments.as_deref(), Some("keep me"));
        assert_eq!(record.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_older_documents_without_optional_fields_still_parse() {
        let doc = serde_json::json!({
            "id": "REQ-20240101120000-abc123",
            "status": "pending",
            "entity": "salesorders",
            "created_at": "2024-01-01T12:00:00Z",
            "created_by": "copilot",
            "payload": { "SoldToParty": "10100001" }
        });
        let record: ApprovalRequest = serde_json::from_value(doc).unwrap();
        assert!(record.is_pending());
        assert!(record.approved_at.is_none());
    }
}
