//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod logs;
mod run;

use anyhow::Result;
use clap::Subcommand;
use tracing::debug;

use crate::config::CliConfig;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Show the state of a pipeline run and its task runs
    Status {
        /// Pipeline run name
        name: String,
    },
    /// Wait for a pipeline run to finish
    Wait {
        /// Pipeline run name
        name: String,
    },
    /// Print logs of a pipeline run
    Logs {
        /// Pipeline run name
        name: String,

        /// Stream logs while the run is executing
        #[arg(short, long)]
        follow: bool,

        /// Only show the logs of this task run
        #[arg(long)]
        task: Option<String>,
    },
    /// Explain why a pipeline run failed
    Errors {
        /// Pipeline run name
        name: String,
    },
    /// Print pipeline results
    Results {
        /// Pipeline run name
        name: String,

        /// Also print the results of every task
        #[arg(long)]
        tasks: bool,
    },
    /// Cancel a pipeline run
    Cancel {
        /// Pipeline run name
        name: String,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &CliConfig) -> Result<()> {
    let client = config.client()?;
    debug!(
        "Using API server {} in namespace {}",
        client.config().api_url,
        client.config().namespace
    );

    match command {
        Commands::Status { name } => run::show_status(&client, &name).await,
        Commands::Wait { name } => run::wait(&client, &name).await,
        Commands::Logs { name, follow, task } => {
            logs::show_logs(&client, &name, follow, task.as_deref()).await
        }
        Commands::Errors { name } => run::show_errors(&client, &name).await,
        Commands::Results { name, tasks } => run::show_results(&client, &name, tasks).await,
        Commands::Cancel { name } => run::cancel(&client, &name).await,
    }
}
