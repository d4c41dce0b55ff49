//! Worker metrics command.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Debug, Deserialize, Serialize)]
struct MetricsSnapshot {
    worker: String,
    succeeded: u64,
    failed: u64,
    total_processed: u64,
    success_rate: String,
    avg_processing_time_ms: u64,
    last_processed_at: Option<String>,
}

#[derive(Debug, Serialize, Tabled)]
struct WorkerRow {
    #[tabled(rename = "Worker")]
    worker: String,
    #[tabled(rename = "Processed")]
    total: u64,
    #[tabled(rename = "Succeeded")]
    succeeded: u64,
    #[tabled(rename = "Failed")]
    failed: u64,
    #[tabled(rename = "Success Rate")]
    success_rate: String,
    #[tabled(rename = "Avg (ms)")]
    avg_ms: u64,
    #[tabled(rename = "Last Job")]
    last: String,
}

pub async fn execute(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let snapshots: Vec<MetricsSnapshot> = client.get("/api/workers/metrics").await?;

    match format {
        OutputFormat::Table => {
            let rows: Vec<WorkerRow> = snapshots
                .into_iter()
                .map(|s| WorkerRow {
                    worker: s.worker,
                    total: s.total_processed,
                    succeeded: s.succeeded,
                    failed: s.failed,
                    success_rate: s.success_rate,
                    avg_ms: s.avg_processing_time_ms,
                    last: s.last_processed_at.unwrap_or_else(|| "-".into()),
                })
                .collect();
            output::print_list(&rows, format)
        }
        _ => output::print_item(&snapshots, format),
    }
}
