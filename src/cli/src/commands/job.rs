//! Job inspection commands.

use anyhow::Result;
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum JobCommands {
    /// Show a job
    Get {
        /// Queue name (email, pdf)
        queue: String,
        /// Job ID
        job_id: Uuid,
    },

    /// Remove a job that is not currently running
    Delete {
        /// Queue name (email, pdf)
        queue: String,
        /// Job ID
        job_id: Uuid,
    },
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobDetail {
    id: Uuid,
    name: String,
    queue_name: String,
    data: Value,
    state: String,
    progress: u8,
    attempts_made: u32,
    max_attempts: u32,
    priority: u32,
    timestamp: i64,
    processed_on: Option<i64>,
    finished_on: Option<i64>,
    #[serde(rename = "returnvalue")]
    return_value: Option<Value>,
    failed_reason: Option<String>,
}

pub async fn execute(cmd: JobCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        JobCommands::Get { queue, job_id } => {
            let job: JobDetail = client.get(&format!("/api/jobs/{}/{}", queue, job_id)).await?;

            match format {
                OutputFormat::Table => {
                    output::print_header(&format!("Job: {}", job.id));
                    output::print_detail("Queue", &job.queue_name);
                    output::print_detail("Name", &job.name);
                    output::print_detail("State", &job.state);
                    output::print_detail("Priority", &job.priority.to_string());
                    output::print_detail(
                        "Attempts",
                        &format!("{}/{}", job.attempts_made, job.max_attempts),
                    );
                    output::print_detail("Progress", &format!("{}%", job.progress));
                    output::print_detail("Created", &output::format_millis(Some(job.timestamp)));
                    output::print_detail("Started", &output::format_millis(job.processed_on));
                    output::print_detail("Finished", &output::format_millis(job.finished_on));
                    if let Some(result) = &job.return_value {
                        output::print_detail("Result", &result.to_string());
                    }
                    if let Some(reason) = &job.failed_reason {
                        output::print_detail("Failure", reason);
                    }
                }
                _ => output::print_item(&job, format)?,
            }
        }

        JobCommands::Delete { queue, job_id } => {
            let resp: Value = client.delete(&format!("/api/jobs/{}/{}", queue, job_id)).await?;

            match format {
                OutputFormat::Table => {
                    output::print_success(&format!("Job {} removed from {}", job_id, queue));
                }
                _ => output::print_item(&resp, format)?,
            }
        }
    }

    Ok(())
}
