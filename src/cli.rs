use clap::{Parser, Subcommand};

use gateway::models::approval::ApprovalStatus;

/// s4gate: approval-gated MCP gateway for SAP S/4HANA
#[derive(Parser)]
#[command(name = "s4gate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to bind (defaults to S4GATE_PORT, then 7071)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Inspect and resolve sales order approval requests
    Approval {
        #[command(subcommand)]
        command: ApprovalCommands,
    },

    /// Print the resolved entity catalog
    Catalog,
}

#[derive(Subcommand)]
pub enum ApprovalCommands {
    /// List approval requests, newest first
    List {
        #[arg(long, value_parser = parse_status)]
        status: Option<ApprovalStatus>,
    },
    /// Show one request as JSON
    Show { id: String },
    /// Approve a pending request and create the sales order
    Approve {
        id: String,
        #[arg(long)]
        comments: Option<String>,
        #[arg(long)]
        approver: Option<String>,
    },
    /// Reject a pending request
    Reject {
        id: String,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        approver: Option<String>,
    },
}

fn parse_status(raw: &str) -> Result<ApprovalStatus, String> {
    match raw.to_ascii_lowercase().as_str() {
        "pending" => Ok(ApprovalStatus::Pending),
        "approved" => Ok(ApprovalStatus::Approved),
        "rejected" => Ok(ApprovalStatus::Rejected),
        other => Err(format!("unknown status '{}' (pending, approved, rejected)", other)),
    }
}
