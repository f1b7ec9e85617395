//! ApprovalStore: durable approval records with an in-process mirror.
//!
//! Each record is a self-contained JSON document at `approvals/<id>.json`
//! in an `object_store` backend:
//!
//! ```text
//! # Local filesystem
//! S4GATE_STORE_URL=file:///var/lib/s4gate
//!
//! # S3 / MinIO
//! S4GATE_STORE_URL=s3://my-bucket?region=eu-north-1&endpoint=http://minio:9000
//!
//! # Azure Blob Storage (credentials from AZURE_STORAGE_* env vars)
//! S4GATE_STORE_URL=az://approvals?account=mystorageacct
//!
//! # In-memory (unset, or memory://), lost on restart
//! ```
//!
//! When the backend is unreachable, operations fall back to the cache and
//! flip the `degraded` flag instead of failing the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::TryStreamExt;
use object_store::{path::Path, ObjectStore, PutMode, PutOptions};

use crate::cache::ApprovalCache;
use crate::errors::AppError;
use crate::models::approval::{is_valid_id, ApprovalPatch, ApprovalRequest};

const DEFAULT_PREFIX: &str = "approvals";

pub struct ApprovalStore {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    kind: &'static str,
    cache: ApprovalCache,
    degraded: AtomicBool,
}

impl ApprovalStore {
    /// Build a store from `S4GATE_STORE_URL`. `None` means in-memory.
    pub fn from_url(url: Option<&str>) -> Result<Self> {
        let url = match url {
            Some(u) if !u.trim().is_empty() => u.trim(),
            _ => {
                tracing::warn!("S4GATE_STORE_URL not set; approval records are kept in memory only");
                return Ok(Self::in_memory());
            }
        };

        let (store, kind) = build_object_store(url)?;
        tracing::info!(url = %url, kind, "ApprovalStore: using object store backend");
        Ok(Self::new(Arc::from(store), kind))
    }

    pub fn new(store: Arc<dyn ObjectStore>, kind: &'static str) -> Self {
        Self {
            store,
            prefix: DEFAULT_PREFIX.to_string(),
            kind,
            cache: ApprovalCache::new(),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(object_store::memory::InMemory::new()), "memory")
    }

    pub fn cache(&self) -> &ApprovalCache {
        &self.cache
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// True when the most recent durable operation failed.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn mark(&self, ok: bool) {
        let was = self.degraded.swap(!ok, Ordering::Relaxed);
        if was && ok {
            tracing::info!("approval store recovered; durable writes resumed");
        }
    }

    fn path(&self, id: &str) -> Path {
        Path::from(format!("{}/{}.json", self.prefix, id))
    }

    /// Persist a new record. Never overwrites: an existing id is `DuplicateId`.
    pub async fn put(&self, record: &ApprovalRequest) -> Result<(), AppError> {
        if !is_valid_id(&record.id) {
            return Err(AppError::validation(format!(
                "invalid approval request id '{}'",
                record.id
            )));
        }
        // reserve the id in-process first so two local writers cannot race
        if !self.cache.insert_new(record.clone()) {
            return Err(AppError::DuplicateId {
                id: record.id.clone(),
            });
        }

        let bytes = serde_json::to_vec_pretty(record)
            .context("failed to serialize approval record")?;
        let result = self
            .store
            .put_opts(
                &self.path(&record.id),
                bytes.into(),
                PutOptions::from(PutMode::Create),
            )
            .await;

        match result {
            Ok(_) => {
                self.mark(true);
                tracing::debug!(id = %record.id, "approval record persisted");
                Ok(())
            }
            Err(object_store::Error::AlreadyExists { .. }) => {
                self.cache.invalidate(&record.id);
                Err(AppError::DuplicateId {
                    id: record.id.clone(),
                })
            }
            Err(e) => {
                self.mark(false);
                tracing::warn!(id = %record.id, error = %e, "durable store unavailable; record kept in cache only");
                Ok(())
            }
        }
    }

    /// Fetch a record. Unknown ids and unreachable storage both yield what
    /// the cache knows, which may be nothing.
    pub async fn get(&self, id: &str) -> Option<ApprovalRequest> {
        if !is_valid_id(id) {
            return None;
        }
        let cached = self.cache.get(id);

        let durable = match self.read(&self.path(id)).await {
            Ok(record) => {
                self.mark(true);
                Some(record)
            }
            Err(ReadError::NotFound) => {
                self.mark(true);
                None
            }
            Err(ReadError::Other(e)) => {
                self.mark(false);
                tracing::warn!(id, error = %e, "durable read failed; serving from cache");
                None
            }
        };

        let chosen = match (durable, cached) {
            (Some(d), Some(c)) => Some(fresher(d, c)),
            (Some(d), None) => Some(d),
            (None, c) => c,
        };
        if let Some(record) = &chosen {
            self.cache.set(record.clone());
        }
        chosen
    }

    /// Merge a partial update into an existing record. Returns `false` when
    /// the id is unknown.
    pub async fn update(&self, id: &str, patch: ApprovalPatch) -> bool {
        self.update_returning(id, patch).await.is_some()
    }

    /// Get-merge-put; returns the record as written.
    pub async fn update_returning(
        &self,
        id: &str,
        patch: ApprovalPatch,
    ) -> Option<ApprovalRequest> {
        let mut record = self.get(id).await?;
        patch.apply(&mut record);

        match serde_json::to_vec_pretty(&record) {
            Ok(bytes) => match self.store.put(&self.path(id), bytes.into()).await {
                Ok(_) => self.mark(true),
                Err(e) => {
                    self.mark(false);
                    tracing::warn!(id, error = %e, "durable update failed; change kept in cache only");
                }
            },
            Err(e) => tracing::error!(id, error = %e, "failed to serialize approval record"),
        }

        self.cache.set(record.clone());
        Some(record)
    }

    /// Every record known to the durable store or this process, newest first.
    pub async fn list_all(&self) -> Vec<ApprovalRequest> {
        let mut merged: std::collections::HashMap<String, ApprovalRequest> =
            std::collections::HashMap::new();

        match self.list_durable().await {
            Ok(records) => {
                self.mark(true);
                for r in records {
                    merged.insert(r.id.clone(), r);
                }
            }
            Err(e) => {
                self.mark(false);
                tracing::warn!(error = %e, "durable listing failed; listing cached records only");
            }
        }

        for cached in self.cache.snapshot() {
            let record = match merged.remove(&cached.id) {
                Some(durable) => fresher(durable, cached),
                None => cached,
            };
            merged.insert(record.id.clone(), record);
        }

        let mut all: Vec<ApprovalRequest> = merged.into_values().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        all
    }

    async fn list_durable(&self) -> Result<Vec<ApprovalRequest>> {
        let prefix = Path::from(self.prefix.as_str());
        let metas: Vec<_> = self
            .store
            .list(Some(&prefix))
            .try_collect()
            .await
            .context("failed to list approval records")?;

        let mut records = Vec::with_capacity(metas.len());
        for meta in metas {
            if !meta.location.as_ref().ends_with(".json") {
                continue;
            }
            match self.read(&meta.location).await {
                Ok(r) => records.push(r),
                Err(ReadError::NotFound) => {}
                Err(ReadError::Other(e)) => {
                    tracing::warn!(key = %meta.location, error = %e, "skipping unreadable approval record");
                }
            }
        }
        Ok(records)
    }

    async fn read(&self, path: &Path) -> std::result::Result<ApprovalRequest, ReadError> {
        let bytes = match self.store.get(path).await {
            Ok(r) => r.bytes().await.map_err(|e| ReadError::Other(e.into()))?,
            Err(object_store::Error::NotFound { .. }) => return Err(ReadError::NotFound),
            Err(e) => return Err(ReadError::Other(e.into())),
        };
        serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse approval record {}", path))
            .map_err(ReadError::Other)
    }
}

enum ReadError {
    NotFound,
    Other(anyhow::Error),
}

/// Pick between the durable and cached copy of one record. The cache holds
/// this process's latest write and wins, unless it still says pending while
/// the durable copy was resolved (by another process).
fn fresher(durable: ApprovalRequest, cached: ApprovalRequest) -> ApprovalRequest {
    if cached.is_pending() && !durable.is_pending() {
        durable
    } else {
        cached
    }
}

/// Parse a `S4GATE_STORE_URL` into an `(ObjectStore impl, kind)` pair.
fn build_object_store(url: &str) -> Result<(Box<dyn ObjectStore>, &'static str)> {
    if url.starts_with("memory://") {
        return Ok((Box::new(object_store::memory::InMemory::new()), "memory"));
    }

    if url.starts_with("file://") {
        let path = url.trim_start_matches("file://");
        std::fs::create_dir_all(path)
            .with_context(|| format!("failed to create store directory {}", path))?;
        let store = object_store::local::LocalFileSystem::new_with_prefix(path)
            .context("failed to create local file system object store")?;
        return Ok((Box::new(store), "file"));
    }

    if url.starts_with("s3://") {
        let without_scheme = url.trim_start_matches("s3://");
        let bucket = without_scheme.split('?').next().unwrap_or(without_scheme);

        let endpoint = parse_query_param(url, "endpoint");
        let region = parse_query_param(url, "region").unwrap_or_else(|| "us-east-1".to_string());

        let mut builder = object_store::aws::AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_region(&region);

        if let Some(ep) = endpoint {
            builder = builder.with_endpoint(&ep).with_allow_http(true);
        }

        let store = builder.build().context("failed to build S3 object store")?;
        return Ok((Box::new(store), "s3"));
    }

    if url.starts_with("az://") {
        let without_scheme = url.trim_start_matches("az://");
        let container = without_scheme.split('?').next().unwrap_or(without_scheme);

        // Credentials from env: AZURE_STORAGE_ACCOUNT_NAME, AZURE_STORAGE_ACCOUNT_KEY, ...
        let mut builder =
            object_store::azure::MicrosoftAzureBuilder::from_env().with_container_name(container);
        if let Some(account) = parse_query_param(url, "account") {
            builder = builder.with_account(account);
        }

        let store = builder.build().context("failed to build Azure object store")?;
        return Ok((Box::new(store), "azure"));
    }

    anyhow::bail!("unsupported S4GATE_STORE_URL scheme: {}", url)
}

fn parse_query_param(url: &str, key: &str) -> Option<String> {
    let query = url.split('?').nth(1)?;
    for part in query.split('&') {
        let mut kv = part.splitn(2, '=');
        if kv.next() == Some(key) {
            return kv.next().map(|v| urlencoding::decode(v).unwrap_or_default().into_owned());
        }
    }
    None
}
