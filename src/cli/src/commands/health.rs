//! Health check command.
//!
//! Queries `/health`, and `/health/ready` for the broker connection.

use anyhow::Result;
use clap::Args;
use serde_json::json;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct HealthArgs {
    /// Also check broker readiness
    #[arg(short, long)]
    detailed: bool,
}

pub async fn execute(args: HealthArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health: serde_json::Value = client.get_raw("/health").await?;
    let ready = if args.detailed {
        Some(client.get_raw("/health/ready").await?)
    } else {
        None
    };

    match format {
        OutputFormat::Table => {
            let status = health
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");

            output::print_header("System Health");
            output::print_detail("Status", status);
            output::print_detail("API URL", client.base_url());

            if let Some(version) = health.get("version").and_then(|v| v.as_str()) {
                output::print_detail("Version", version);
            }

            if let Some(ts) = health.get("timestamp").and_then(|v| v.as_str()) {
                output::print_detail("Timestamp", ts);
            }

            let mut healthy = status == "healthy";
            if let Some(ready) = &ready {
                let broker = ready.get("broker").and_then(|v| v.as_str()).unwrap_or("?");
                output::print_detail("Broker", broker);
                if let Some(err) = ready.get("error").and_then(|v| v.as_str()) {
                    output::print_detail("Broker error", err);
                }
                healthy &= broker == "up";
            }

            if healthy {
                output::print_success("All systems operational");
            } else {
                output::print_error(&format!("System status: {}", status));
            }
        }
        _ => output::print_item(&json!({ "health": health, "readiness": ready }), format)?,
    }

    Ok(())
}
