//! Approval state machine for protected creates.
//!
//! ```text
//!             submit
//!   (none) ──────────► pending ──approve (create ok)──► approved
//!                        │  ▲
//!                        │  └──approve (create failed): stays pending, last_error set
//!                        └────reject──────────────────► rejected
//! ```
//!
//! `approved` and `rejected` are terminal. The backend create for a
//! protected entity happens here and nowhere else.

pub mod clean;
pub mod hooks;
pub mod ids;

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::backend::ODataClient;
use crate::catalog::PROTECTED_ENTITY;
use crate::errors::AppError;
use crate::models::approval::{ApprovalPatch, ApprovalRequest, ApprovalStatus, Payload};
use crate::store::approval_store::ApprovalStore;

pub use hooks::{ApprovalLinks, HookSet, TransitionEvent, TransitionHook, TransitionKind};

/// Fresh ids tried before a submission gives up on collisions.
const ID_ATTEMPTS: usize = 3;

/// What a caller asks to create, before it becomes a record.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub payload: Payload,
    pub created_by: String,
    pub justification: String,
    pub source: String,
}

/// Who resolved a request, and their note (comments or rejection reason).
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub approver: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    pub request: ApprovalRequest,
    pub created_entity: Value,
}

pub struct ApprovalService {
    store: Arc<ApprovalStore>,
    backend: Arc<ODataClient>,
    hooks: HookSet,
    public_url: String,
    /// Serializes approve/reject per id within this process.
    resolving: DashMap<String, Arc<Mutex<()>>>,
    /// Await hooks before returning instead of spawning them.
    inline_hooks: bool,
}

impl ApprovalService {
    pub fn new(
        store: Arc<ApprovalStore>,
        backend: Arc<ODataClient>,
        hooks: HookSet,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            backend,
            hooks,
            public_url: public_url.into(),
            resolving: DashMap::new(),
            inline_hooks: false,
        }
    }

    /// Deliver notifications before each transition call returns. For
    /// short-lived processes such as the CLI.
    pub fn with_inline_hooks(mut self) -> Self {
        self.inline_hooks = true;
        self
    }

    pub fn store(&self) -> &ApprovalStore {
        &self.store
    }

    pub fn hooks(&self) -> &HookSet {
        &self.hooks
    }

    pub fn links(&self, id: &str) -> ApprovalLinks {
        ApprovalLinks::for_request(&self.public_url, id)
    }

    /// Record a new pending request for the protected entity. Nothing is
    /// sent to the backend.
    pub async fn submit(&self, submission: Submission) -> Result<ApprovalRequest, AppError> {
        let created_by = match submission.created_by.trim() {
            "" => "unknown".to_string(),
            s => s.to_string(),
        };

        let mut last_err = None;
        for _ in 0..ID_ATTEMPTS {
            let now = Utc::now();
            let request = ApprovalRequest {
                id: ids::generate_id(now),
                status: ApprovalStatus::Pending,
                entity: PROTECTED_ENTITY.to_string(),
                created_at: now,
                created_by: created_by.clone(),
                payload: submission.payload.clone(),
                justification: submission.justification.clone(),
                source: submission.source.clone(),
                approved_at: None,
                rejected_at: None,
                approver: None,
                approver_comments: None,
                rejection_reason: None,
                created_entity: None,
                last_error: None,
            };

            match self.store.put(&request).await {
                Ok(()) => {
                    tracing::info!(
                        request_id = %request.id,
                        created_by = %request.created_by,
                        source = %request.source,
                        "approval request submitted"
                    );
                    self.emit(TransitionKind::Requested, &request, None).await;
                    return Ok(request);
                }
                Err(e @ AppError::DuplicateId { .. }) => {
                    tracing::warn!(id = %request.id, "approval id collision; retrying with a fresh id");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| AppError::Internal(anyhow::anyhow!("id generation failed"))))
    }

    /// Approve a pending request: clean the payload, create it in the
    /// backend, and only then mark it approved.
    pub async fn approve(&self, id: &str, resolution: Resolution) -> Result<ApprovalOutcome, AppError> {
        let slot = self.lock_for(id).await;

        let current = self.pending(id).await?;

        let result = match clean::clean_sales_order(&current.payload) {
            Ok(cleaned) => self.backend.create(&current.entity, &cleaned, true).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(created) => {
                let patch = ApprovalPatch {
                    status: Some(ApprovalStatus::Approved),
                    approved_at: Some(Utc::now()),
                    approver: resolution.approver,
                    approver_comments: resolution.note,
                    created_entity: Some(created.clone()),
                    ..Default::default()
                };
                let request = match self.store.update_returning(id, patch.clone()).await {
                    Some(r) => r,
                    None => {
                        let mut r = current;
                        patch.apply(&mut r);
                        r
                    }
                };
                drop(slot);

                tracing::info!(
                    request_id = %request.id,
                    approver = ?request.approver,
                    "approval request approved; entity created"
                );
                self.emit(TransitionKind::Approved, &request, None).await;
                Ok(ApprovalOutcome {
                    request,
                    created_entity: created,
                })
            }
            Err(e) => {
                let message = e.to_string();
                let patched = self
                    .store
                    .update_returning(
                        id,
                        ApprovalPatch {
                            last_error: Some(message.clone()),
                            ..Default::default()
                        },
                    )
                    .await
                    .unwrap_or(current);
                tracing::warn!(
                    request_id = %id,
                    error = %message,
                    "approve failed; request stays pending"
                );
                drop(slot);
                self.emit(TransitionKind::Failed, &patched, Some(message)).await;
                Err(e)
            }
        }
    }

    /// Reject a pending request. No backend call is made.
    pub async fn reject(&self, id: &str, resolution: Resolution) -> Result<ApprovalRequest, AppError> {
        let reason = resolution
            .note
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| AppError::validation("a rejection reason is required"))?
            .to_string();

        let slot = self.lock_for(id).await;

        let current = self.pending(id).await?;
        let patch = ApprovalPatch {
            status: Some(ApprovalStatus::Rejected),
            rejected_at: Some(Utc::now()),
            approver: resolution.approver,
            rejection_reason: Some(reason),
            ..Default::default()
        };
        let request = match self.store.update_returning(id, patch.clone()).await {
            Some(r) => r,
            None => {
                let mut r = current;
                patch.apply(&mut r);
                r
            }
        };
        drop(slot);

        tracing::info!(request_id = %request.id, approver = ?request.approver, "approval request rejected");
        self.emit(TransitionKind::Rejected, &request, None).await;
        Ok(request)
    }

    pub async fn status(&self, id: &str) -> Result<ApprovalRequest, AppError> {
        self.store.get(id).await.ok_or_else(|| AppError::NotFound { id: id.to_string() })
    }

    pub async fn list(&self) -> Vec<ApprovalRequest> {
        self.store.list_all().await
    }

    async fn pending(&self, id: &str) -> Result<ApprovalRequest, AppError> {
        let current = self.status(id).await?;
        if !current.is_pending() {
            return Err(AppError::AlreadyResolved {
                id: current.id,
                status: current.status,
            });
        }
        Ok(current)
    }

    /// Take the per-id resolve lock. The map entry goes away with the last
    /// holder, whatever the outcome of the resolution.
    async fn lock_for(&self, id: &str) -> ResolveSlot<'_> {
        let lock = self
            .resolving
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        ResolveSlot {
            resolving: &self.resolving,
            id: id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    async fn emit(&self, kind: TransitionKind, request: &ApprovalRequest, error: Option<String>) {
        let event = TransitionEvent {
            kind,
            request: request.clone(),
            links: self.links(&request.id),
            error,
        };
        if self.inline_hooks {
            self.hooks.run_all(&event).await;
        } else {
            self.hooks.dispatch(event);
        }
    }
}

/// Held while one id is being resolved.
struct ResolveSlot<'a> {
    resolving: &'a DashMap<String, Arc<Mutex<()>>>,
    id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ResolveSlot<'_> {
    fn drop(&mut self) {
        // release our clone first; waiters still hold theirs
        self.guard.take();
        self.resolving
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Credentials;
    use crate::catalog::EntityCatalog;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(base: &str) -> ApprovalService {
        let catalog = Arc::new(EntityCatalog::builtin(base));
        let backend = ODataClient::new(
            catalog,
            Some(Credentials {
                user: "u".into(),
                password: "p".into(),
            }),
            Duration::from_secs(5),
            Duration::from_secs(5),
            false,
        )
        .unwrap();
        ApprovalService::new(
            Arc::new(ApprovalStore::in_memory()),
            Arc::new(backend),
            HookSet::new(),
            "http://localhost:7071",
        )
    }

    fn submission(payload: Value) -> Submission {
        Submission {
            payload: serde_json::from_value(payload).unwrap(),
            created_by: "copilot".into(),
            justification: "restock".into(),
            source: "mcp".into(),
        }
    }

    async fn mount_handshake(server: &MockServer, expected_posts: u64) {
        Mock::given(method("GET"))
            .and(header("x-csrf-token", "Fetch"))
            .respond_with(ResponseTemplate::new(200).insert_header("x-csrf-token", "tok-1"))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/sap/opu/odata/sap/API_SALES_ORDER_SRV/A_SalesOrder"))
            .and(header("x-csrf-token", "tok-1"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"d": {"SalesOrder": "4711"}})),
            )
            .expect(expected_posts)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_submit_creates_pending_record_without_backend_call() {
        let server = MockServer::start().await;
        let svc = service(&server.uri());

        let req = svc
            .submit(submission(json!({"SoldToParty": "10100001", "SalesOrderType": "OR"})))
            .await
            .unwrap();
        assert!(ids::looks_generated(&req.id));
        assert_eq!(req.status, ApprovalStatus::Pending);
        assert_eq!(req.entity, "salesorders");

        let loaded = svc.status(&req.id).await.unwrap();
        assert_eq!(loaded.payload, req.payload);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_approve_creates_once_then_conflicts() {
        let server = MockServer::start().await;
        mount_handshake(&server, 1).await;
        let svc = service(&server.uri());

        let req = svc
            .submit(submission(json!({"SoldToParty": "10100001", "justification": "x"})))
            .await
            .unwrap();
        let outcome = svc
            .approve(
                &req.id,
                Resolution {
                    approver: Some("alice".into()),
                    note: Some("ok".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.created_entity["SalesOrder"], "4711");
        assert_eq!(outcome.request.status, ApprovalStatus::Approved);
        assert_eq!(outcome.request.approver_comments.as_deref(), Some("ok"));

        let err = svc.approve(&req.id, Resolution::default()).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::AlreadyResolved {
                status: ApprovalStatus::Approved,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_concurrent_approves_create_exactly_once() {
        let server = MockServer::start().await;
        mount_handshake(&server, 1).await;
        let svc = Arc::new(service(&server.uri()));

        let req = svc.submit(submission(json!({"SoldToParty": "1"}))).await.unwrap();
        let a = tokio::spawn({
            let svc = svc.clone();
            let id = req.id.clone();
            async move { svc.approve(&id, Resolution::default()).await }
        });
        let b = tokio::spawn({
            let svc = svc.clone();
            let id = req.id.clone();
            async move { svc.approve(&id, Resolution::default()).await }
        });
        let results = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    }

    #[tokio::test]
    async fn test_failed_create_keeps_request_pending() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).insert_header("x-csrf-token", "tok-1"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(
                json!({"error": {"message": {"value": "Sold-to party 1 does not exist"}}}),
            ))
            .mount(&server)
            .await;
        let svc = service(&server.uri());

        let req = svc.submit(submission(json!({"SoldToParty": "1"}))).await.unwrap();
        let err = svc.approve(&req.id, Resolution::default()).await.unwrap_err();
        assert!(matches!(err, AppError::Backend(_)));

        let after = svc.status(&req.id).await.unwrap();
        assert_eq!(after.status, ApprovalStatus::Pending);
        assert!(after.last_error.unwrap().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_reject_requires_reason_and_skips_backend() {
        let server = MockServer::start().await;
        let svc = service(&server.uri());
        let req = svc.submit(submission(json!({"SoldToParty": "1"}))).await.unwrap();

        let err = svc.reject(&req.id, Resolution::default()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));

        let rejected = svc
            .reject(
                &req.id,
                Resolution {
                    approver: Some("bob".into()),
                    note: Some("budget exceeded".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(rejected.status, ApprovalStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("budget exceeded"));
        assert!(rejected.rejected_at.is_some());
        assert!(server.received_requests().await.unwrap().is_empty());

        let err = svc.approve(&req.id, Resolution::default()).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyResolved { .. }));
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let svc = service("http://127.0.0.1:9");
        let err = svc.status("REQ-missing").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
        let err = svc.approve("REQ-missing", Resolution::default()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_resolve_locks_are_released_on_every_outcome() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).insert_header("x-csrf-token", "tok-1"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let svc = service(&server.uri());

        for i in 0..100 {
            let id = format!("REQ-unknown-{}", i);
            assert!(svc.approve(&id, Resolution::default()).await.is_err());
            let reject = Resolution {
                approver: None,
                note: Some("no".into()),
            };
            assert!(svc.reject(&id, reject).await.is_err());
        }
        assert!(svc.resolving.is_empty());

        // failed backend create
        let req = svc.submit(submission(json!({"SoldToParty": "1"}))).await.unwrap();
        assert!(svc.approve(&req.id, Resolution::default()).await.is_err());
        assert!(svc.resolving.is_empty());

        // already resolved
        let reject = Resolution {
            approver: None,
            note: Some("budget exceeded".into()),
        };
        svc.reject(&req.id, reject.clone()).await.unwrap();
        assert!(svc.reject(&req.id, reject).await.is_err());
        assert!(svc.approve(&req.id, Resolution::default()).await.is_err());
        assert!(svc.resolving.is_empty());
    }
}
