//! Log command handler

use anyhow::Result;
use colored::*;
use pipewatch_client::{LogOutput, PipelineClient, SourceLog, TaskRunLogs};
use tracing::debug;

/// Print logs of a whole pipeline run, or of one of its task runs
pub async fn show_logs(
    client: &PipelineClient,
    name: &str,
    follow: bool,
    task: Option<&str>,
) -> Result<()> {
    if let Some(task_run) = task {
        debug!("Reading logs of task run '{}'", task_run);
        return show_task_run_logs(client, task_run, follow).await;
    }

    let aggregator = client.aggregator(name);

    if follow {
        let mut lines = aggregator.interleaved_logs();
        while let Some((task, line)) = lines.next().await? {
            println!("{} {}", format!("[{}]", task).cyan(), line);
        }
        return Ok(());
    }

    let logs = aggregator.logs().await?;
    if logs.is_empty() {
        println!("{}", "No logs found for this pipeline run.".yellow());
        return Ok(());
    }

    for (task, sources) in logs {
        println!("{}", format!("Logs for task {}:", task).bold());
        print_sources(&sources);
    }

    Ok(())
}

async fn show_task_run_logs(client: &PipelineClient, task_run: &str, follow: bool) -> Result<()> {
    match TaskRunLogs::new(client.clone(), task_run).read(follow, follow).await? {
        LogOutput::Stream(mut lines) => {
            while let Some(line) = lines.next().await? {
                println!("{}", line);
            }
        }
        LogOutput::Complete(sources) => {
            if sources.is_empty() {
                println!("{}", "No logs found for this task run.".yellow());
            }
            print_sources(&sources);
        }
    }

    Ok(())
}

fn print_sources(sources: &[SourceLog]) {
    for source in sources {
        if let Some(container) = &source.container {
            println!("{}", format!("── {} ", container).dimmed());
        }
        print!("{}", source.text);
        if !source.text.is_empty() && !source.text.ends_with('\n') {
            println!();
        }
    }
}
