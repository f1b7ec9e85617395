use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use gateway::approval::{ApprovalService, Resolution};
use gateway::config::{self, Config};
use gateway::{api, AppState};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load()?;
    init_tracing(&cfg)?;

    let args = cli::Cli::parse();
    let result = match args.command {
        Some(cli::Commands::Serve { port }) => run_server(cfg, port).await,
        Some(cli::Commands::Approval { command }) => handle_approval_command(cfg, command).await,
        Some(cli::Commands::Catalog) => print_catalog(cfg),
        None => run_server(cfg, None).await,
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// Structured logs to stdout, plus OTLP export when
/// `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
fn init_tracing(cfg: &Config) -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "s4gate"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let fmt_layer = if cfg.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "gateway=debug,s4gate=debug,tower_http=info".into()),
        ))
        .with(fmt_layer)
        .with(telemetry_layer)
        .init();
    Ok(())
}

async fn run_server(cfg: Config, port: Option<u16>) -> anyhow::Result<()> {
    let port = port.unwrap_or(cfg.port);
    if !cfg.has_sap_credentials() {
        tracing::warn!("SAP_USER/SAP_PASS not set; backend calls will be refused");
    }

    let state = Arc::new(AppState::from_config(cfg)?);
    tracing::info!(
        store = state.store.kind(),
        hooks = ?state.approvals.hooks().names(),
        "approval pipeline ready"
    );

    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("s4gate listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// The CLI exits right after a transition, so hooks run inline.
fn cli_approvals(state: &AppState) -> ApprovalService {
    ApprovalService::new(
        state.store.clone(),
        state.backend.clone(),
        state.approvals.hooks().clone(),
        state.config.public_url.clone(),
    )
    .with_inline_hooks()
}

async fn handle_approval_command(cfg: Config, cmd: cli::ApprovalCommands) -> anyhow::Result<()> {
    let state = AppState::from_config(cfg)?;
    let approvals = cli_approvals(&state);

    match cmd {
        cli::ApprovalCommands::List { status } => {
            let requests: Vec<_> = approvals
                .list()
                .await
                .into_iter()
                .filter(|r| status.map_or(true, |s| r.status == s))
                .collect();

            if requests.is_empty() {
                println!("No approval requests.");
                return Ok(());
            }

            println!("{:<28} {:<10} {:<16} {:<26} CREATED", "ID", "STATUS", "CREATED BY", "SOLD-TO");
            for r in requests {
                let sold_to = r
                    .payload
                    .get("SoldToParty")
                    .and_then(|v| v.as_str())
                    .unwrap_or("-");
                println!(
                    "{:<28} {:<10} {:<16} {:<26} {}",
                    r.id,
                    r.status,
                    r.created_by,
                    sold_to,
                    r.created_at.format("%Y-%m-%d %H:%M")
                );
            }
            if approvals.store().is_degraded() {
                eprintln!("warning: durable store unavailable, listing is cache-only");
            }
        }
        cli::ApprovalCommands::Show { id } => {
            let request = approvals.status(&id).await?;
            println!("{}", serde_json::to_string_pretty(&request)?);
        }
        cli::ApprovalCommands::Approve { id, comments, approver } => {
            let outcome = approvals
                .approve(
                    &id,
                    Resolution {
                        approver: approver.or(Some("cli".to_string())),
                        note: comments,
                    },
                )
                .await?;
            println!("Request {} approved.", outcome.request.id);
            println!("{}", serde_json::to_string_pretty(&outcome.created_entity)?);
        }
        cli::ApprovalCommands::Reject { id, reason, approver } => {
            let request = approvals
                .reject(
                    &id,
                    Resolution {
                        approver: approver.or(Some("cli".to_string())),
                        note: Some(reason),
                    },
                )
                .await?;
            println!("Request {} rejected.", request.id);
        }
    }
    Ok(())
}

fn print_catalog(cfg: Config) -> anyhow::Result<()> {
    let catalog = gateway::catalog::EntityCatalog::load(cfg.catalog_path.as_deref(), &cfg.sap_base_url)?;
    println!("{:<24} {:<10} URL", "ENTITY", "CREATABLE");
    for d in catalog.descriptors() {
        println!("{:<24} {:<10} {}", d.name, d.creatable, d.resource_url);
    }
    Ok(())
}
