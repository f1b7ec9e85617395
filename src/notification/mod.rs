pub mod chat;
pub mod email;
pub mod webhook;

use std::sync::Arc;

use crate::approval::HookSet;
use crate::config::Config;
use crate::metrics::Metrics;

/// Assemble the transition hooks the configuration asks for. Metrics are
/// always attached.
pub fn build_hooks(cfg: &Config, metrics: Arc<Metrics>) -> anyhow::Result<HookSet> {
    let mut hooks = HookSet::new().with(metrics);

    if let Some(url) = &cfg.chat_webhook_url {
        hooks = hooks.with(Arc::new(chat::ChatNotifier::new(url.clone())));
    }

    match (&cfg.email_relay_url, &cfg.approver_email) {
        (Some(relay), Some(to)) => {
            hooks = hooks.with(Arc::new(email::EmailNotifier::new(relay.clone(), to.clone())));
        }
        (Some(_), None) | (None, Some(_)) => {
            tracing::warn!(
                "email notifications need both S4GATE_EMAIL_RELAY_URL and S4GATE_APPROVER_EMAIL; disabled"
            );
        }
        (None, None) => {}
    }

    if !cfg.webhook_urls.is_empty() {
        hooks = hooks.with(Arc::new(webhook::WebhookNotifier::new(
            cfg.webhook_urls.clone(),
            cfg.webhook_secret.clone(),
        )?));
    }

    tracing::info!(hooks = ?hooks.names(), "approval notification hooks configured");
    Ok(hooks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_configured_sinks_are_attached() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let cfg = Config::default();
        assert_eq!(build_hooks(&cfg, metrics.clone()).unwrap().names(), vec!["metrics"]);

        let cfg = Config {
            chat_webhook_url: Some("http://chat".into()),
            email_relay_url: Some("http://relay".into()),
            webhook_urls: vec!["http://hook".into()],
            ..Config::default()
        };
        assert_eq!(
            build_hooks(&cfg, metrics).unwrap().names(),
            vec!["metrics", "chat", "webhook"]
        );
    }
}
