//! Jobforge CLI - submit and administer background jobs over the HTTP API.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{config, health, job, queue, submit, workers};
use output::OutputFormat;

/// Jobforge - durable background job queue
#[derive(Parser)]
#[command(
    name = "jobforge",
    version,
    about = "Jobforge - durable background job queue",
    long_about = "Submit email and PDF jobs, inspect them, and administer queues and workers.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// API server URL
    #[arg(long, global = true, env = "JOBFORGE_API_URL")]
    api_url: Option<String>,

    /// Admin API key, sent as X-API-Key
    #[arg(long, global = true, env = "JOBFORGE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a job
    #[command(subcommand)]
    Submit(submit::SubmitCommands),

    /// Inspect or remove jobs
    #[command(subcommand)]
    Job(job::JobCommands),

    /// Queue administration
    #[command(subcommand)]
    Queue(queue::QueueCommands),

    /// Show per-worker processing metrics
    Workers,

    /// Check system health
    Health(health::HealthArgs),

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let api_url = cli
        .api_url
        .clone()
        .or_else(|| config::load_value("api-url"))
        .unwrap_or_else(|| "http://localhost:8080".to_string());
    let api_key = cli.api_key.clone().or_else(|| config::load_value("api-key"));

    let client = client::ApiClient::new(&api_url, api_key)?;
    let format = cli.output;

    let result = match cli.command {
        Commands::Submit(cmd) => submit::execute(cmd, &client, format).await,
        Commands::Job(cmd) => job::execute(cmd, &client, format).await,
        Commands::Queue(cmd) => queue::execute(cmd, &client, format).await,
        Commands::Workers => workers::execute(&client, format).await,
        Commands::Health(args) => health::execute(args, &client, format).await,
        Commands::Config(cmd) => config::execute(cmd, format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
