use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;

use crate::approval::{TransitionEvent, TransitionHook, TransitionKind};

/// Posts approval events to a chat incoming-webhook (Teams and Slack both
/// accept a plain `{"text": ...}` body).
#[derive(Clone)]
pub struct ChatNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl ChatNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url,
        }
    }
}

pub fn format_message(event: &TransitionEvent) -> String {
    let r = &event.request;
    match event.kind {
        TransitionKind::Requested => {
            let payload = serde_json::to_string_pretty(&r.payload).unwrap_or_default();
            let justification = if r.justification.is_empty() {
                "(none given)"
            } else {
                r.justification.as_str()
            };
            format!(
                "🚨 *Sales order approval required*\n\nRequest ID: `{}`\nRequested by: {}\nJustification: {}\n```{}```\n\nApprove: {}\nReject: {}\n\nOr run `s4gate approval approve {}`",
                r.id, r.created_by, justification, payload, event.links.approve, event.links.reject, r.id
            )
        }
        TransitionKind::Approved => format!(
            "✅ Request `{}` approved by {}; sales order created.",
            r.id,
            r.approver.as_deref().unwrap_or("unknown")
        ),
        TransitionKind::Rejected => format!(
            "❌ Request `{}` rejected by {}: {}",
            r.id,
            r.approver.as_deref().unwrap_or("unknown"),
            r.rejection_reason.as_deref().unwrap_or("")
        ),
        TransitionKind::Failed => format!(
            "⚠️ Approving request `{}` failed and it is still pending: {}",
            r.id,
            event.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

#[async_trait]
impl TransitionHook for ChatNotifier {
    fn name(&self) -> &str {
        "chat"
    }

    async fn on_transition(&self, event: &TransitionEvent) -> anyhow::Result<()> {
        let message = ChatMessage {
            text: format_message(event),
        };

        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&message)
            .send()
            .await
            .context("failed to send chat notification")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("chat webhook returned error: status={}, body={}", status, body);
        }

        tracing::info!(request_id = %event.request.id, event_type = event.kind.event_type(), "sent chat notification");
        Ok(())
    }
}

#[derive(Serialize)]
struct ChatMessage {
    text: String,
}
