use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;

use crate::models::approval::ApprovalRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Requested,
    Approved,
    Rejected,
    /// Approve attempted but the backend create failed; record stays pending.
    Failed,
}

impl TransitionKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            TransitionKind::Requested => "approval_requested",
            TransitionKind::Approved => "approval_approved",
            TransitionKind::Rejected => "approval_rejected",
            TransitionKind::Failed => "approval_failed",
        }
    }
}

/// One-click links a reviewer can follow from a notification.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ApprovalLinks {
    pub approve: String,
    pub reject: String,
    pub status: String,
}

impl ApprovalLinks {
    pub fn for_request(public_url: &str, id: &str) -> Self {
        let base = public_url.trim_end_matches('/');
        let id = urlencoding::encode(id);
        Self {
            approve: format!("{}/api/approve?id={}", base, id),
            reject: format!("{}/api/reject?id={}", base, id),
            status: format!("{}/api/approvals/{}", base, id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransitionEvent {
    pub kind: TransitionKind,
    pub request: ApprovalRequest,
    pub links: ApprovalLinks,
    pub error: Option<String>,
}

/// Reacts to an approval lifecycle transition. Implementations must not
/// assume delivery order between hooks.
#[async_trait]
pub trait TransitionHook: Send + Sync {
    fn name(&self) -> &str;

    async fn on_transition(&self, event: &TransitionEvent) -> anyhow::Result<()>;
}

#[derive(Clone, Default)]
pub struct HookSet {
    hooks: Vec<Arc<dyn TransitionHook>>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, hook: Arc<dyn TransitionHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.hooks.iter().map(|h| h.name().to_string()).collect()
    }

    /// Fire-and-forget: each hook runs on its own task, so a slow or failing
    /// sink never delays the transition or the other sinks.
    pub fn dispatch(&self, event: TransitionEvent) {
        if self.hooks.is_empty() {
            return;
        }
        let event = Arc::new(event);
        for hook in &self.hooks {
            let hook = hook.clone();
            let event = event.clone();
            tokio::spawn(async move {
                run_one(hook.as_ref(), &event).await;
            });
        }
    }

    /// Run every hook to completion on the current task. Used by the CLI,
    /// which exits right after a transition.
    pub async fn run_all(&self, event: &TransitionEvent) -> usize {
        let mut failures = 0;
        for hook in &self.hooks {
            if !run_one(hook.as_ref(), event).await {
                failures += 1;
            }
        }
        failures
    }
}

async fn run_one(hook: &dyn TransitionHook, event: &TransitionEvent) -> bool {
    match AssertUnwindSafe(hook.on_transition(event)).catch_unwind().await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(
                hook = hook.name(),
                event_type = event.kind.event_type(),
                request_id = %event.request.id,
                error = %e,
                "approval notification failed"
            );
            false
        }
        Err(_) => {
            tracing::error!(
                hook = hook.name(),
                event_type = event.kind.event_type(),
                request_id = %event.request.id,
                "approval notification panicked"
            );
            false
        }
    }
}
