use anyhow::Result;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::{info, warn};

use crate::approval::{ApprovalLinks, TransitionEvent, TransitionHook};

// ── Webhook Event Types ───────────────────────────────────────

/// A structured event payload sent to webhook endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    /// `approval_requested`, `approval_approved`, `approval_rejected` or `approval_failed`.
    pub event_type: String,
    /// RFC 3339 timestamp of when the event occurred.
    pub timestamp: String,
    pub request_id: String,
    pub status: String,
    pub entity: String,
    pub created_by: String,
    pub links: ApprovalLinks,
    /// Event-specific details (approver, reason, created entity, error).
    pub details: serde_json::Value,
}

impl WebhookEvent {
    pub fn from_transition(event: &TransitionEvent) -> Self {
        let r = &event.request;
        let details = serde_json::json!({
            "approver": r.approver,
            "approver_comments": r.approver_comments,
            "rejection_reason": r.rejection_reason,
            "created_entity": r.created_entity,
            "error": event.error,
            "payload": r.payload,
        });
        Self {
            event_type: event.kind.event_type().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            request_id: r.id.clone(),
            status: r.status.to_string(),
            entity: r.entity.clone(),
            created_by: r.created_by.clone(),
            links: event.links.clone(),
            details,
        }
    }
}

// ── HMAC Signing ─────────────────────────────────────────────

/// HMAC-SHA256 of `payload` under `secret`, as `sha256=<hex>`.
pub fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid webhook signing key: {}", e))?;
    mac.update(payload);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

// ── Webhook Notifier ──────────────────────────────────────────

/// Delivers approval events to every configured URL.
/// - optional HMAC-SHA256 signing (`x-s4gate-signature`)
/// - up to 3 retries per URL with back-off (1s → 5s → 25s)
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    urls: Vec<String>,
    secret: Option<String>,
    backoff: Vec<Duration>,
}

impl WebhookNotifier {
    pub fn new(urls: Vec<String>, secret: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("s4gate-webhook/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build webhook HTTP client: {}", e))?;
        Ok(Self {
            client,
            urls,
            secret,
            backoff: [0, 1, 5, 25].iter().map(|s| Duration::from_secs(*s)).collect(),
        })
    }

    /// Replace the delay schedule; the first entry precedes the first attempt.
    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Send one event to one URL, retrying on transport errors and non-2xx.
    pub async fn send(&self, url: &str, event: &WebhookEvent) -> Result<()> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| anyhow::anyhow!("webhook serialize error: {}", e))?;
        let delivery_id = uuid::Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = match &self.secret {
            Some(s) => Some(hmac_sha256_hex(s, &payload)?),
            None => None,
        };

        for (attempt, delay) in self.backoff.iter().enumerate() {
            if !delay.is_zero() {
                tracing::debug!(
                    url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    event_type = %event.event_type,
                    "retrying webhook delivery"
                );
                tokio::time::sleep(*delay).await;
            }

            let mut req = self
                .client
                .post(url)
                .header("content-type", "application/json")
                .header("x-s4gate-delivery-id", &delivery_id)
                .header("x-s4gate-timestamp", &timestamp)
                .header("x-s4gate-event", &event.event_type);
            if let Some(sig) = &signature {
                req = req.header("x-s4gate-signature", sig.as_str());
            }

            match req.body(payload.clone()).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        "webhook delivered"
                    );
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    warn!(
                        url,
                        event_type = %event.event_type,
                        attempt,
                        status = %status,
                        body = %body,
                        "webhook delivery failed (non-2xx)"
                    );
                }
                Err(e) => {
                    warn!(
                        url,
                        event_type = %event.event_type,
                        attempt,
                        error = %e,
                        "webhook request error"
                    );
                }
            }
        }

        Err(anyhow::anyhow!(
            "webhook delivery failed after {} attempts: {}",
            self.backoff.len(),
            url
        ))
    }
}

#[async_trait]
impl TransitionHook for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    /// Each URL is attempted independently; one failing endpoint does not
    /// block the others.
    async fn on_transition(&self, event: &TransitionEvent) -> Result<()> {
        let payload = WebhookEvent::from_transition(event);
        let mut failed = Vec::new();
        for url in &self.urls {
            if let Err(e) = self.send(url, &payload).await {
                warn!(url, error = %e, "webhook dispatch ultimately failed");
                failed.push(url.as_str());
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("undelivered to {} of {} webhook(s)", failed.len(), self.urls.len())
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::TransitionKind;
    use crate::models::approval::ApprovalRequest;
    use wiremock::matchers::{header, header_exists, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transition(kind: TransitionKind) -> TransitionEvent {
        let request: ApprovalRequest = serde_json::from_value(serde_json::json!({
            "id": "REQ-20240101120000-abc123",
            "status": "rejected",
            "entity": "salesorders",
            "created_at": "2024-01-01T12:00:00Z",
            "created_by": "copilot",
            "payload": {"SoldToParty": "10100001"},
            "rejection_reason": "budget exceeded"
        }))
        .unwrap();
        TransitionEvent {
            kind,
            links: ApprovalLinks::for_request("http://gw", &request.id),
            request,
            error: None,
        }
    }

    #[test]
    fn test_event_carries_transition_details() {
        let event = WebhookEvent::from_transition(&transition(TransitionKind::Rejected));
        assert_eq!(event.event_type, "approval_rejected");
        assert_eq!(event.status, "rejected");
        assert_eq!(event.details["rejection_reason"], "budget exceeded");
        assert_eq!(event.links.approve, "http://gw/api/approve?id=REQ-20240101120000-abc123");
    }

    #[test]
    fn test_hmac_signature_deterministic() {
        let sig1 = hmac_sha256_hex("secret123", b"payload").unwrap();
        let sig2 = hmac_sha256_hex("secret123", b"payload").unwrap();
        assert_eq!(sig1, sig2);
        assert!(sig1.starts_with("sha256="));
        assert_ne!(sig1, hmac_sha256_hex("secret2", b"payload").unwrap());
    }

    #[tokio::test]
    async fn test_signed_delivery() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-s4gate-event", "approval_requested"))
            .and(header_exists("x-s4gate-signature"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(vec![server.uri()], Some("s3cret".into())).unwrap();
        notifier
            .on_transition(&transition(TransitionKind::Requested))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_retries_then_gives_up() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(vec![server.uri()], None)
            .unwrap()
            .with_backoff(vec![Duration::ZERO, Duration::from_millis(10), Duration::from_millis(10)]);
        let result = notifier.on_transition(&transition(TransitionKind::Failed)).await;
        assert!(result.is_err());
    }
}
