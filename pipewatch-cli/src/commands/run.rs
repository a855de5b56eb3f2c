//! Pipeline run command handlers
//!
//! Status, completion, diagnostics, results and cancellation of one
//! pipeline run.

use anyhow::{Result, bail};
use colored::*;
use pipewatch_client::PipelineClient;
use pipewatch_core::{LifecycleState, ResourceSnapshot};
use tracing::{info, warn};

/// Show a pipeline run with the state of each task run
pub async fn show_status(client: &PipelineClient, name: &str) -> Result<()> {
    let run = client.pipeline_run(name);

    let Some(snapshot) = run.snapshot().await? else {
        println!("{}", format!("Pipeline run '{}' not found.", name).yellow());
        return Ok(());
    };

    print_run_details(client, &snapshot);

    let children = run.child_task_runs().await?;
    if children.is_empty() {
        return Ok(());
    }

    println!();
    println!("{}", "Task runs:".bold());
    for child in children {
        let task_run = run.task_run(&child);
        let state = task_run.lifecycle().await?;
        println!(
            "  {} {} ({})",
            format_state(state),
            child.task_name().bold(),
            child.name.dimmed()
        );
    }

    Ok(())
}

/// Block until the run finishes; fails unless it succeeded
pub async fn wait(client: &PipelineClient, name: &str) -> Result<()> {
    info!(
        "Waiting up to {}s for pipeline run '{}'",
        client.config().wait.timeout.as_secs(),
        name
    );
    let Some(snapshot) = client.pipeline_run(name).wait_for_finish().await? else {
        bail!("Pipeline run '{}' does not exist", name);
    };

    print_run_details(client, &snapshot);

    match client.config().policy.lifecycle(snapshot.condition()) {
        LifecycleState::Succeeded => Ok(()),
        state => {
            warn!("Pipeline run '{}' finished as {}", name, state);
            println!();
            print!("{}", client.aggregator(name).error_message().await?.red());
            bail!("Pipeline run '{}' {}", name, state)
        }
    }
}

/// Print the failure narrative
pub async fn show_errors(client: &PipelineClient, name: &str) -> Result<()> {
    let records = client.aggregator(name).error_records().await?;

    for record in records {
        println!("{}", record.to_string().red());
    }

    Ok(())
}

/// Print pipeline results, and optionally the results of each task
pub async fn show_results(client: &PipelineClient, name: &str, tasks: bool) -> Result<()> {
    let aggregator = client.aggregator(name);

    let results = aggregator.pipeline_results().await?;
    if results.is_empty() {
        println!("{}", "No pipeline results.".yellow());
    } else {
        println!("{}", serde_json::to_string_pretty(&results)?);
    }

    if tasks {
        let task_results = aggregator.task_results().await?;
        println!();
        println!("{}", "Task results:".bold());
        println!("{}", serde_json::to_string_pretty(&task_results)?);
    }

    Ok(())
}

/// Request cancellation
pub async fn cancel(client: &PipelineClient, name: &str) -> Result<()> {
    info!("Cancelling pipeline run '{}'", name);
    client.pipeline_run(name).cancel().await?;
    println!("{}", format!("✓ Cancellation of '{}' requested", name).green());
    Ok(())
}

fn print_run_details(client: &PipelineClient, snapshot: &ResourceSnapshot) {
    let state = client.config().policy.lifecycle(snapshot.condition());

    println!("{} {}", "Pipeline run:".bold(), snapshot.name);
    println!("  {} {}", "State:".bold(), format_state(state));

    if let Some(condition) = snapshot.condition() {
        println!("  {} {}", "Reason:".bold(), condition.reason);
        if !condition.message.is_empty() {
            println!("  {} {}", "Message:".bold(), condition.message);
        }
        if let Some(completed) = condition.completion_time {
            println!(
                "  {} {}",
                "Completed:".bold(),
                completed.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
    }
}

/// Format a lifecycle state with color
pub fn format_state(state: LifecycleState) -> ColoredString {
    let text = state.to_string();
    match state {
        LifecycleState::NotStarted => text.yellow(),
        LifecycleState::Running => text.blue(),
        LifecycleState::Succeeded => text.green(),
        LifecycleState::Failed => text.red(),
        LifecycleState::Cancelled => text.dimmed(),
    }
}
