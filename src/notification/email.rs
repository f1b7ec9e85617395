use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;

use crate::approval::{TransitionEvent, TransitionHook, TransitionKind};
use crate::render;

/// Mails the approver through an HTTP mail relay (a Logic App, SendGrid
/// bridge or similar) that accepts `{to, subject, html}`.
#[derive(Clone)]
pub struct EmailNotifier {
    client: reqwest::Client,
    relay_url: String,
    to: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

impl EmailNotifier {
    pub fn new(relay_url: String, to: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            relay_url,
            to,
        }
    }

    /// Only events the approver must act on produce mail.
    pub fn compose(&self, event: &TransitionEvent) -> Option<EmailMessage> {
        let r = &event.request;
        let (subject, html) = match event.kind {
            TransitionKind::Requested => (
                format!("Approval required: sales order request {}", r.id),
                render::approval_email(r, &event.links),
            ),
            TransitionKind::Failed => (
                format!("Approval of {} failed; request still pending", r.id),
                format!(
                    "<p>The backend refused the create: {}</p>{}",
                    render::escape(event.error.as_deref().unwrap_or("unknown error")),
                    render::approval_email(r, &event.links)
                ),
            ),
            TransitionKind::Approved | TransitionKind::Rejected => return None,
        };
        Some(EmailMessage {
            to: self.to.clone(),
            subject,
            html,
        })
    }
}

#[async_trait]
impl TransitionHook for EmailNotifier {
    fn name(&self) -> &str {
        "email"
    }

    async fn on_transition(&self, event: &TransitionEvent) -> anyhow::Result<()> {
        let Some(message) = self.compose(event) else {
            return Ok(());
        };

        let resp = self
            .client
            .post(&self.relay_url)
            .json(&message)
            .send()
            .await
            .context("failed to reach email relay")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("email relay returned error: status={}, body={}", status, body);
        }

        tracing::info!(request_id = %event.request.id, to = %self.to, "sent approval email");
        Ok(())
    }
}
