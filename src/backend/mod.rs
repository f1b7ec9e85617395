//! HTTP client for the S/4HANA OData services.
//!
//! Reads are a single authenticated GET. Creates follow the SAP Gateway
//! CSRF handshake: a GET with `X-CSRF-Token: Fetch` returns the token and
//! session cookies, then the POST replays both.
//!
//! The client knows nothing about approvals, except that it refuses to
//! create the protected entity unless the caller passes `allow_protected`.
//! Only the approval state machine does that.

pub mod normalize;

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{ACCEPT, CONTENT_TYPE, COOKIE, SET_COOKIE};
use serde_json::{json, Value};

use crate::catalog::{EntityCatalog, EntityDescriptor};
use crate::config::Config;
use crate::errors::{AppError, BackendError};
use crate::metrics::Metrics;
use crate::models::approval::Payload;

pub use normalize::Record;

const CSRF_HEADER: &str = "x-csrf-token";
/// Longest backend error body we echo back to callers.
const MAX_ERROR_BODY: usize = 2000;

#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"****")
            .finish()
    }
}

pub struct ODataClient {
    client: reqwest::Client,
    catalog: Arc<EntityCatalog>,
    credentials: Option<Credentials>,
    read_timeout: Duration,
    write_timeout: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl ODataClient {
    pub fn from_config(cfg: &Config, catalog: Arc<EntityCatalog>) -> anyhow::Result<Self> {
        let credentials = match (&cfg.sap_user, &cfg.sap_pass) {
            (Some(user), Some(password)) if cfg.has_sap_credentials() => Some(Credentials {
                user: user.clone(),
                password: password.clone(),
            }),
            _ => None,
        };
        if credentials.is_none() {
            tracing::warn!("SAP_USER / SAP_PASS not set; backend calls will fail until configured");
        }
        Self::new(
            catalog,
            credentials,
            cfg.read_timeout(),
            cfg.write_timeout(),
            cfg.accept_invalid_certs,
        )
    }

    pub fn new(
        catalog: Arc<EntityCatalog>,
        credentials: Option<Credentials>,
        read_timeout: Duration,
        write_timeout: Duration,
        accept_invalid_certs: bool,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .danger_accept_invalid_certs(accept_invalid_certs)
            .pool_max_idle_per_host(16)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {}", e))?;

        Ok(Self {
            client,
            catalog,
            credentials,
            read_timeout,
            write_timeout,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn catalog(&self) -> &EntityCatalog {
        &self.catalog
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    fn observe<T>(&self, op: &str, result: &Result<T, AppError>, started: Instant) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        let outcome = match result {
            Ok(_) => "ok",
            Err(AppError::Backend(e)) => e.class(),
            Err(_) => "rejected",
        };
        metrics.record_backend(op, outcome, started.elapsed().as_secs_f64());
    }

    fn credentials(&self) -> Result<&Credentials, BackendError> {
        self.credentials.as_ref().ok_or(BackendError::NoCredentials)
    }

    /// Read `entity` with a raw OData query string (`$filter=...&$top=5`).
    ///
    /// Unknown entities fail before any network I/O.
    pub async fn fetch(&self, entity: &str, query: &str) -> Result<Vec<Record>, AppError> {
        let started = Instant::now();
        let result = self.fetch_inner(entity, query).await;
        self.observe("fetch", &result, started);
        result
    }

    async fn fetch_inner(&self, entity: &str, query: &str) -> Result<Vec<Record>, AppError> {
        let descriptor = self.catalog.resolve(entity).ok_or_else(|| {
            AppError::validation_with(
                format!("Invalid entity '{}'", entity),
                json!({ "allowed_entities": self.catalog.readable_names() }),
            )
        })?;
        let creds = self.credentials()?;
        let url = build_url(descriptor, query)?;

        tracing::debug!(entity = %descriptor.name, url = %url, "fetching from S/4HANA");

        let resp = self
            .client
            .get(url)
            .basic_auth(&creds.user, Some(&creds.password))
            .header(ACCEPT, "application/json")
            .timeout(self.read_timeout)
            .send()
            .await
            .map_err(|e| transport_error(e, &descriptor.name))?;

        let status = resp.status();
        if status.as_u16() != 200 {
            let body = resp.text().await.unwrap_or_default();
            tracing::error!(entity = %descriptor.name, status = status.as_u16(), "S/4HANA read failed");
            return Err(rejected(status.as_u16(), &body).into());
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        let records = normalize::normalize_records(body)?;
        tracing::debug!(entity = %descriptor.name, count = records.len(), "S/4HANA read ok");
        Ok(records)
    }

    /// Create an entity through the CSRF handshake.
    ///
    /// The protected entity is refused with `SecurityViolation` unless
    /// `allow_protected` is set, and that check runs before anything else.
    pub async fn create(
        &self,
        entity: &str,
        payload: &Payload,
        allow_protected: bool,
    ) -> Result<Value, AppError> {
        let started = Instant::now();
        let result = self.create_inner(entity, payload, allow_protected).await;
        self.observe("create", &result, started);
        result
    }

    async fn create_inner(
        &self,
        entity: &str,
        payload: &Payload,
        allow_protected: bool,
    ) -> Result<Value, AppError> {
        if self.catalog.requires_approval(entity) && !allow_protected {
            tracing::warn!(entity = %entity, "blocked unapproved create of protected entity");
            return Err(AppError::SecurityViolation {
                entity: entity.trim().to_lowercase(),
            });
        }

        let descriptor = self.catalog.resolve_creatable(entity).ok_or_else(|| {
            AppError::validation_with(
                format!("Invalid creatable entity '{}'", entity),
                json!({ "allowed_entities": self.catalog.creatable_names() }),
            )
        })?;
        let creds = self.credentials()?;
        let name = &descriptor.name;

        tracing::info!(entity = %name, "fetching CSRF token");
        let token_resp = self
            .client
            .get(&descriptor.resource_url)
            .basic_auth(&creds.user, Some(&creds.password))
            .header(CSRF_HEADER, "Fetch")
            .header(ACCEPT, "application/json")
            .timeout(self.write_timeout)
            .send()
            .await
            .map_err(|e| transport_error(e, name))?;

        let token = token_resp
            .headers()
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case("required"))
            .map(String::from)
            .ok_or(BackendError::MissingWriteToken)?;
        let cookies = session_cookies(token_resp.headers());

        tracing::info!(entity = %name, "posting create to S/4HANA");
        let mut req = self
            .client
            .post(&descriptor.resource_url)
            .basic_auth(&creds.user, Some(&creds.password))
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .header(CSRF_HEADER, token)
            .header("x-requested-with", "XMLHttpRequest")
            .timeout(self.write_timeout);
        if let Some(cookie) = cookies {
            req = req.header(COOKIE, cookie);
        }

        let resp = req
            .json(payload)
            .send()
            .await
            .map_err(|e| transport_error(e, name))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| transport_error(e, name))?;

        if status != 200 && status != 201 {
            tracing::error!(entity = %name, status, "S/4HANA create failed");
            return Err(rejected(status, &body).into());
        }

        tracing::info!(entity = %name, status, "S/4HANA create succeeded");
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        let parsed: Value = serde_json::from_str(&body)
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        Ok(normalize::unwrap_entity(parsed))
    }
}

fn build_url(descriptor: &EntityDescriptor, query: &str) -> Result<url::Url, AppError> {
    let mut url = url::Url::parse(&descriptor.resource_url).map_err(|e| {
        AppError::Internal(anyhow::anyhow!(
            "catalog URL for {} is invalid: {}",
            descriptor.name,
            e
        ))
    })?;
    let query = query.trim().trim_start_matches('?');
    if !query.is_empty() {
        url.set_query(Some(query));
    }
    Ok(url)
}

fn transport_error(e: reqwest::Error, entity: &str) -> BackendError {
    if e.is_timeout() {
        tracing::error!(entity, "S/4HANA request timed out");
        BackendError::Timeout {
            entity: entity.to_string(),
        }
    } else {
        tracing::error!(entity, error = %e, "S/4HANA unreachable");
        BackendError::Network(e.to_string())
    }
}

fn rejected(status: u16, body: &str) -> BackendError {
    BackendError::RemoteRejected {
        status,
        message: sap_error_message(body),
    }
}

/// Pull `error.message.value` out of an SAP Gateway error body, falling back
/// to the (truncated) raw text.
fn sap_error_message(body: &str) -> String {
    if let Ok(v) = serde_json::from_str::<Value>(body) {
        if let Some(msg) = v["error"]["message"]["value"].as_str() {
            return msg.to_string();
        }
    }
    body.chars().take(MAX_ERROR_BODY).collect()
}

/// Collapse `Set-Cookie` headers into a single `Cookie` request header.
fn session_cookies(headers: &reqwest::header::HeaderMap) -> Option<String> {
    let pairs: Vec<&str> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}
