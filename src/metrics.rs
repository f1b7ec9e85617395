//! Prometheus metrics for the gateway.
//!
//! Exposed on `GET /metrics`. Each `Metrics` owns its registry so that
//! several gateways (tests build many) never collide on registration.

use async_trait::async_trait;
use prometheus::{
    histogram_opts, opts, Encoder, HistogramVec, IntCounterVec, Registry, TextEncoder,
};

use crate::approval::{TransitionEvent, TransitionHook, TransitionKind};

pub struct Metrics {
    registry: Registry,
    rpc_requests_total: IntCounterVec,
    tool_calls_total: IntCounterVec,
    approvals_total: IntCounterVec,
    backend_duration_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let rpc_requests_total = IntCounterVec::new(
            opts!("s4gate_rpc_requests_total", "JSON-RPC requests by method and outcome"),
            &["method", "outcome"],
        )?;
        let tool_calls_total = IntCounterVec::new(
            opts!("s4gate_tool_calls_total", "Tool invocations by tool and outcome"),
            &["tool", "outcome"],
        )?;
        let approvals_total = IntCounterVec::new(
            opts!("s4gate_approvals_total", "Approval lifecycle transitions"),
            &["transition"],
        )?;
        let backend_duration_seconds = HistogramVec::new(
            histogram_opts!(
                "s4gate_backend_duration_seconds",
                "S/4HANA call latency in seconds",
                vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 15.0, 30.0, 60.0]
            ),
            &["op", "outcome"],
        )?;

        registry.register(Box::new(rpc_requests_total.clone()))?;
        registry.register(Box::new(tool_calls_total.clone()))?;
        registry.register(Box::new(approvals_total.clone()))?;
        registry.register(Box::new(backend_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            rpc_requests_total,
            tool_calls_total,
            approvals_total,
            backend_duration_seconds,
        })
    }

    pub fn record_rpc(&self, method: &str, outcome: &str) {
        // method names come from callers; keep label cardinality bounded
        let method = match method {
            "initialize" | "initialized" | "notifications/initialized" | "tools/list"
            | "tools/call" => method,
            _ => "other",
        };
        self.rpc_requests_total
            .with_label_values(&[method, outcome])
            .inc();
    }

    pub fn record_tool(&self, tool: &str, outcome: &str) {
        self.tool_calls_total.with_label_values(&[tool, outcome]).inc();
    }

    pub fn record_backend(&self, op: &str, outcome: &str, seconds: f64) {
        self.backend_duration_seconds
            .with_label_values(&[op, outcome])
            .observe(seconds);
    }

    /// Prometheus text exposition of everything in this registry.
    pub fn encode(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[async_trait]
impl TransitionHook for Metrics {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn on_transition(&self, event: &TransitionEvent) -> anyhow::Result<()> {
        let transition = match event.kind {
            TransitionKind::Requested => "requested",
            TransitionKind::Approved => "approved",
            TransitionKind::Rejected => "rejected",
            TransitionKind::Failed => "failed",
        };
        self.approvals_total.with_label_values(&[transition]).inc();
        Ok(())
    }
}
