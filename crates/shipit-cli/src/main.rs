//! shipit CLI tool.

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "shipit")]
#[command(about = "shipit service scaffolding CLI", long_about = None)]
struct Cli {
    /// API server URL
    #[arg(long, env = "SHIPIT_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a job to a queue
    Submit {
        /// Target queue (generation, build, deployment, cleanup)
        queue: String,
        /// Job payload as inline JSON
        payload: String,
        /// Idempotency key; generated when omitted
        #[arg(long)]
        id: Option<String>,
        /// Scheduling priority (higher runs first)
        #[arg(long)]
        priority: Option<i32>,
        /// Delay before the job becomes eligible, in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,
        /// Override the queue's retry limit
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Show a job's record including live progress
    Status {
        queue: String,
        id: String,
    },
    /// Cancel a job that has not started
    Cancel {
        queue: String,
        id: String,
    },
    /// Re-enqueue a failed job
    Retry {
        queue: String,
        id: String,
    },
    /// Show per-status counts, for one queue or all
    Stats {
        queue: Option<String>,
    },
    /// Poll a job until it reaches a terminal state
    Watch {
        queue: String,
        id: String,
        /// Poll interval in milliseconds
        #[arg(long, default_value = "500")]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Submit {
            queue,
            payload,
            id,
            priority,
            delay_ms,
            max_attempts,
        } => {
            commands::submit(
                &cli.api_url,
                &queue,
                &payload,
                id,
                priority,
                delay_ms,
                max_attempts,
            )
            .await?;
        }
        Commands::Status { queue, id } => {
            commands::status(&cli.api_url, &queue, &id).await?;
        }
        Commands::Cancel { queue, id } => {
            commands::cancel(&cli.api_url, &queue, &id).await?;
        }
        Commands::Retry { queue, id } => {
            commands::retry(&cli.api_url, &queue, &id).await?;
        }
        Commands::Stats { queue } => {
            commands::stats(&cli.api_url, queue.as_deref()).await?;
        }
        Commands::Watch {
            queue,
            id,
            interval_ms,
        } => {
            commands::watch(&cli.api_url, &queue, &id, interval_ms).await?;
        }
    }

    Ok(())
}
