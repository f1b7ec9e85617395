use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    /// Root of the S/4HANA system, e.g. `http://host:54000`.
    pub sap_base_url: String,
    pub sap_user: Option<String>,
    pub sap_pass: Option<String>,
    /// Sandbox systems often run with self-signed certificates.
    pub accept_invalid_certs: bool,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    /// `file://`, `s3://`, `az://` or `memory://`. Unset means in-memory.
    pub store_url: Option<String>,
    /// Optional YAML file replacing the built-in entity catalog.
    pub catalog_path: Option<String>,
    /// Externally reachable base URL used when rendering approve/reject links.
    pub public_url: String,
    pub chat_webhook_url: Option<String>,
    pub email_relay_url: Option<String>,
    pub approver_email: Option<String>,
    /// Comma-separated list of webhook URLs to notify on approval events.
    pub webhook_urls: Vec<String>,
    pub webhook_secret: Option<String>,
    pub log_json: bool,
}

impl Config {
    /// True when both halves of the backend basic-auth pair are present.
    pub fn has_sap_credentials(&self) -> bool {
        matches!(
            (self.sap_user.as_deref(), self.sap_pass.as_deref()),
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty()
        )
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 7071,
            sap_base_url: "http://localhost:50000".into(),
            sap_user: None,
            sap_pass: None,
            accept_invalid_certs: false,
            read_timeout_secs: 15,
            write_timeout_secs: 60,
            store_url: None,
            catalog_path: None,
            public_url: "http://localhost:7071".into(),
            chat_webhook_url: None,
            email_relay_url: None,
            approver_email: None,
            webhook_urls: Vec::new(),
            webhook_secret: None,
            log_json: false,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let defaults = Config::default();
    let port = env_parse("S4GATE_PORT").unwrap_or(defaults.port);

    let sap_base_url = std::env::var("SAP_BASE_URL")
        .map(|u| u.trim_end_matches('/').to_string())
        .unwrap_or(defaults.sap_base_url);
    url::Url::parse(&sap_base_url)
        .map_err(|e| anyhow::anyhow!("SAP_BASE_URL is not a valid URL ({}): {}", sap_base_url, e))?;

    Ok(Config {
        port,
        sap_base_url,
        sap_user: env_opt("SAP_USER"),
        sap_pass: env_opt("SAP_PASS"),
        accept_invalid_certs: env_parse("SAP_ACCEPT_INVALID_CERTS").unwrap_or(false),
        read_timeout_secs: env_parse("S4GATE_READ_TIMEOUT_SECS")
            .unwrap_or(defaults.read_timeout_secs),
        write_timeout_secs: env_parse("S4GATE_WRITE_TIMEOUT_SECS")
            .unwrap_or(defaults.write_timeout_secs),
        store_url: env_opt("S4GATE_STORE_URL"),
        catalog_path: env_opt("S4GATE_CATALOG_PATH"),
        public_url: env_opt("S4GATE_PUBLIC_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("http://localhost:{}", port)),
        chat_webhook_url: env_opt("S4GATE_CHAT_WEBHOOK_URL"),
        email_relay_url: env_opt("S4GATE_EMAIL_RELAY_URL"),
        approver_email: env_opt("S4GATE_APPROVER_EMAIL"),
        webhook_urls: split_list(&std::env::var("S4GATE_WEBHOOK_URLS").unwrap_or_default()),
        webhook_secret: env_opt("S4GATE_WEBHOOK_SECRET"),
        log_json: std::env::var("S4GATE_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false),
    })
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
