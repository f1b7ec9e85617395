//! s4gate: approval-gated MCP gateway for SAP S/4HANA.
//!
//! The binary in `main.rs` is a thin CLI over this library; integration
//! tests in `tests/` build the same `AppState` against mocked backends.

pub mod api;
pub mod approval;
pub mod backend;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod mcp;
pub mod metrics;
pub mod models;
pub mod notification;
pub mod render;
pub mod store;

use std::sync::Arc;

use approval::{ApprovalService, HookSet};
use backend::ODataClient;
use catalog::EntityCatalog;
use config::Config;
use mcp::dispatcher::Dispatcher;
use metrics::Metrics;
use store::approval_store::ApprovalStore;

/// Shared application state passed to handlers.
pub struct AppState {
    pub config: Config,
    pub backend: Arc<ODataClient>,
    pub store: Arc<ApprovalStore>,
    pub approvals: Arc<ApprovalService>,
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Wire every component from configuration.
    pub fn from_config(cfg: Config) -> anyhow::Result<Self> {
        let store = ApprovalStore::from_url(cfg.store_url.as_deref())?;
        let metrics = Arc::new(Metrics::new()?);
        let hooks = notification::build_hooks(&cfg, metrics.clone())?;
        Self::assemble(cfg, store, hooks, metrics)
    }

    /// Wire components around an explicit store and hook set.
    pub fn assemble(
        cfg: Config,
        store: ApprovalStore,
        hooks: HookSet,
        metrics: Arc<Metrics>,
    ) -> anyhow::Result<Self> {
        let catalog = Arc::new(EntityCatalog::load(
            cfg.catalog_path.as_deref(),
            &cfg.sap_base_url,
        )?);
        let backend = Arc::new(ODataClient::from_config(&cfg, catalog)?.with_metrics(metrics.clone()));
        let store = Arc::new(store);
        let approvals = Arc::new(ApprovalService::new(
            store.clone(),
            backend.clone(),
            hooks,
            cfg.public_url.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            backend.clone(),
            approvals.clone(),
            metrics.clone(),
        )?);

        Ok(Self {
            config: cfg,
            backend,
            store,
            approvals,
            dispatcher,
            metrics,
        })
    }
}
