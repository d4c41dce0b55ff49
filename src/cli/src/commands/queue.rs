//! Queue administration commands.

use std::collections::BTreeMap;

use anyhow::Result;
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum QueueCommands {
    /// Show job counts for every queue
    List,

    /// Show job counts for one queue
    Stats {
        /// Queue name (email, pdf)
        queue: String,
    },

    /// Stop workers from claiming new jobs
    Pause {
        queue: String,
    },

    /// Let workers claim jobs again
    Resume {
        queue: String,
    },

    /// Remove finished jobs
    Purge {
        queue: String,

        /// Keep jobs that finished within this many milliseconds
        #[arg(long, default_value = "0")]
        grace_ms: u64,
    },

    /// Remove jobs that have not started yet
    Drain {
        queue: String,

        /// Also remove delayed jobs
        #[arg(long)]
        include_delayed: bool,

        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct QueueStats {
    waiting: u64,
    active: u64,
    completed: u64,
    failed: u64,
    delayed: u64,
    paused: bool,
    total: u64,
}

#[derive(Debug, Deserialize, Serialize)]
struct QueueStatsResponse {
    queue: String,
    stats: QueueStats,
}

#[derive(Debug, Serialize, Tabled)]
struct QueueRow {
    #[tabled(rename = "Queue")]
    queue: String,
    #[tabled(rename = "Waiting")]
    waiting: u64,
    #[tabled(rename = "Active")]
    active: u64,
    #[tabled(rename = "Delayed")]
    delayed: u64,
    #[tabled(rename = "Completed")]
    completed: u64,
    #[tabled(rename = "Failed")]
    failed: u64,
    #[tabled(rename = "Paused")]
    paused: bool,
}

impl QueueRow {
    fn new(queue: String, stats: &QueueStats) -> Self {
        Self {
            queue,
            waiting: stats.waiting,
            active: stats.active,
            delayed: stats.delayed,
            completed: stats.completed,
            failed: stats.failed,
            paused: stats.paused,
        }
    }
}

pub async fn execute(cmd: QueueCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        QueueCommands::List => {
            let all: BTreeMap<String, QueueStats> = client.get("/api/stats").await?;
            match format {
                OutputFormat::Table => {
                    let rows: Vec<QueueRow> = all
                        .iter()
                        .map(|(queue, stats)| QueueRow::new(queue.clone(), stats))
                        .collect();
                    output::print_list(&rows, format)?;
                }
                _ => output::print_item(&all, format)?,
            }
        }

        QueueCommands::Stats { queue } => {
            let resp: QueueStatsResponse = client.get(&format!("/api/queues/{}/stats", queue)).await?;
            match format {
                OutputFormat::Table => {
                    output::print_list(&[QueueRow::new(resp.queue, &resp.stats)], format)?;
                }
                _ => output::print_item(&resp, format)?,
            }
        }

        QueueCommands::Pause { queue } => {
            let resp: Value = client
                .post(&format!("/api/queues/{}/pause", queue), &json!({}))
                .await?;
            report(format, &resp, &format!("Queue {} paused", queue))?;
        }

        QueueCommands::Resume { queue } => {
            let resp: Value = client
                .post(&format!("/api/queues/{}/resume", queue), &json!({}))
                .await?;
            report(format, &resp, &format!("Queue {} resumed", queue))?;
        }

        QueueCommands::Purge { queue, grace_ms } => {
            let resp: Value = client
                .post(
                    &format!("/api/queues/{}/purge", queue),
                    &json!({ "grace_ms": grace_ms }),
                )
                .await?;
            let removed = resp.get("removed").and_then(Value::as_u64).unwrap_or(0);
            report(format, &resp, &format!("Purged {} finished jobs from {}", removed, queue))?;
        }

        QueueCommands::Drain {
            queue,
            include_delayed,
            force,
        } => {
            if !force {
                output::print_info(&format!(
                    "This removes every waiting job in '{}'. Use --force to confirm.",
                    queue
                ));
                return Ok(());
            }

            let resp: Value = client
                .post(
                    &format!("/api/queues/{}/drain", queue),
                    &json!({ "include_delayed": include_delayed }),
                )
                .await?;
            let removed = resp.get("removed").and_then(Value::as_u64).unwrap_or(0);
            report(format, &resp, &format!("Drained {} jobs from {}", removed, queue))?;
        }
    }

    Ok(())
}

fn report(format: OutputFormat, resp: &Value, message: &str) -> Result<()> {
    match format {
        OutputFormat::Table => {
            output::print_success(message);
            Ok(())
        }
        _ => output::print_item(resp, format),
    }
}
