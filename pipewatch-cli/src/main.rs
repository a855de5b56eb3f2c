//! Pipewatch CLI
//!
//! Command-line interface for following pipeline runs on a cluster.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::CliConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "pipewatch")]
#[command(about = "Follow pipeline runs, their logs and failures", long_about = None)]
struct Cli {
    /// API server URL
    #[arg(long, env = "PIPEWATCH_API_URL")]
    api_url: String,

    /// Namespace holding the pipeline runs
    #[arg(short, long, env = "PIPEWATCH_NAMESPACE")]
    namespace: String,

    /// Bearer token
    #[arg(long, env = "PIPEWATCH_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Maximum time to wait for a pipeline run to finish, in seconds
    #[arg(long, env = "PIPEWATCH_WAIT_TIMEOUT_SECS")]
    wait_timeout: Option<u64>,

    /// Interval between completion checks, in seconds
    #[arg(long, env = "PIPEWATCH_POLL_INTERVAL_SECS")]
    poll_interval: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pipewatch=info,pipewatch_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = CliConfig {
        api_url: cli.api_url,
        namespace: cli.namespace,
        token: cli.token,
        wait_timeout: cli.wait_timeout,
        poll_interval: cli.poll_interval,
    };

    handle_command(cli.command, &config).await
}
