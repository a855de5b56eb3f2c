//! Whole-pipeline views
//!
//! `PipelineAggregator` walks a pipeline run's child task runs to collect
//! their results, their logs and a single failure narrative. Task runs are
//! visited in the order the pipeline run lists them.

use pipewatch_core::{ChildReference, ErrorRecord, ResourceSnapshot, StepResult};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::mpsc::{self, UnboundedReceiver, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;
use crate::logs::{LogLines, SourceLog, TaskRunLogs};
use crate::tracker::PipelineRun;
use crate::PipelineClient;

/// Task result carrying plugin diagnostics
pub const PLUGIN_ANNOTATIONS_RESULT: &str = "annotations";

const PLUGINS_METADATA_KEY: &str = "plugins-metadata";
const PLUGIN_ERRORS_KEY: &str = "errors";

/// Results, logs and diagnostics of one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineAggregator {
    run: PipelineRun,
}

impl PipelineAggregator {
    pub fn new(run: PipelineRun) -> Self {
        Self { run }
    }

    pub fn run(&self) -> &PipelineRun {
        &self.run
    }

    fn client(&self) -> &PipelineClient {
        &self.run.client
    }

    /// Snapshots of the child task runs that still exist, with their references
    async fn task_runs(&self) -> Result<Vec<(ChildReference, ResourceSnapshot)>> {
        let mut task_runs = Vec::new();
        for child in self.run.child_task_runs().await? {
            match self.run.task_run(&child).snapshot().await? {
                Some(snapshot) => task_runs.push((child, snapshot)),
                None => debug!("task run '{}' does not exist", child.name),
            }
        }
        Ok(task_runs)
    }

    // =============================================================================
    // Results
    // =============================================================================

    /// Declared results of every task, keyed by pipeline task name
    pub async fn task_results(&self) -> Result<BTreeMap<String, BTreeMap<String, Value>>> {
        Ok(self
            .task_runs()
            .await?
            .into_iter()
            .map(|(child, snapshot)| {
                let results = snapshot
                    .results
                    .into_iter()
                    .map(|result| (result.name, result.value))
                    .collect();
                (child.task_name().to_string(), results)
            })
            .collect())
    }

    /// Pipeline-level results, decoded as JSON where possible
    ///
    /// Values that do not parse are kept as the raw string. Null results are
    /// dropped.
    pub async fn pipeline_results(&self) -> Result<BTreeMap<String, Value>> {
        let Some(snapshot) = self.run.snapshot().await? else {
            return Ok(BTreeMap::new());
        };

        Ok(snapshot
            .results
            .into_iter()
            .filter_map(|result| {
                let value = decode_result(result.value);
                (!value.is_null()).then_some((result.name, value))
            })
            .collect())
    }

    // =============================================================================
    // Diagnostics
    // =============================================================================

    /// Ordered failure records: plugin errors, then per-task failures in
    /// discovery order, then a pipeline-level fallback when no task explained
    /// the failure
    pub async fn error_records(&self) -> Result<Vec<ErrorRecord>> {
        let Some(pipeline) = self.run.snapshot().await? else {
            return Ok(vec![ErrorRecord::pipeline(
                self.run.name(),
                "pipeline run does not exist",
            )]);
        };

        let policy = &self.client().config().policy;
        let plugin_task = &self.client().config().plugin_task;
        let task_runs = self.task_runs().await?;

        let mut records = Vec::new();
        if let Some((_, snapshot)) = task_runs
            .iter()
            .find(|(child, _)| child.task_name() == plugin_task.as_str())
        {
            records.extend(plugin_errors(snapshot));
        }

        let mut explained = false;
        let mut unexplained = Vec::new();
        for (child, snapshot) in &task_runs {
            let Some(condition) = snapshot.condition() else {
                continue;
            };
            if !policy.reports_failure(condition) {
                continue;
            }

            let task = child.task_name();
            let steps: Vec<ErrorRecord> = snapshot
                .steps
                .iter()
                .filter(|step| step.has_failed())
                .map(|step| ErrorRecord::step(task, &step.name, step_detail(task, step)))
                .collect();

            if !steps.is_empty() {
                records.extend(steps);
                explained = true;
            } else if !condition.message.is_empty() {
                records.push(ErrorRecord::task(task, condition.message.clone()));
                explained = true;
            } else {
                unexplained.push(ErrorRecord::task(
                    task,
                    format!("task run finished with reason '{}'", condition.reason),
                ));
            }
        }

        if !explained {
            let message = pipeline
                .condition()
                .map(|condition| condition.message.clone())
                .filter(|message| !message.is_empty());
            match message {
                Some(detail) => records.push(ErrorRecord::pipeline(self.run.name(), detail)),
                None if !unexplained.is_empty() => records.extend(unexplained),
                None => records.push(ErrorRecord::pipeline(
                    self.run.name(),
                    "pipeline run failed without an error message",
                )),
            }
        }

        Ok(records)
    }

    /// The failure records rendered as one message
    pub async fn error_message(&self) -> Result<String> {
        Ok(ErrorRecord::render(&self.error_records().await?))
    }

    // =============================================================================
    // Logs
    // =============================================================================

    /// Complete logs of every task run, keyed by pipeline task name, in
    /// discovery order
    pub async fn logs(&self) -> Result<Vec<(String, Vec<SourceLog>)>> {
        let mut logs = Vec::new();
        for child in self.run.child_task_runs().await? {
            let task_logs = TaskRunLogs::new(self.client().clone(), child.name.clone())
                .fetch_all()
                .await?;
            logs.push((child.task_name().to_string(), task_logs));
        }
        Ok(logs)
    }

    /// Lines of all task runs as they are discovered, interleaved round-robin
    ///
    /// Task runs are discovered by a background task, so this must be called
    /// from within a tokio runtime.
    pub fn interleaved_logs(&self) -> InterleavedLogs {
        let (sender, discovered) = mpsc::unbounded_channel();
        let mut children = self.run.watch_new_children();

        let discovery = tokio::spawn(async move {
            while let Some(batch) = children.next().await.transpose() {
                let failed = batch.is_err();
                if sender.send(batch).is_err() || failed {
                    break;
                }
            }
        });

        InterleavedLogs {
            client: self.client().clone(),
            discovered,
            discovery,
            discovering: true,
            active: VecDeque::new(),
            rotation: 0,
        }
    }
}

/// Decodes a result value given as a JSON-encoded string
fn decode_result(value: Value) -> Value {
    match value {
        Value::String(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
        other => other,
    }
}

fn step_detail(task: &str, step: &StepResult) -> String {
    let Some(terminated) = &step.terminated else {
        return String::new();
    };

    match terminated.task_result() {
        Ok(Some(result)) => return result,
        Ok(None) => {}
        Err(e) => warn!(
            "Cannot decode termination message of step '{}' in task '{}': {}",
            step.name, task, e
        ),
    }

    format!(
        "failed with exit code {} and reason '{}'",
        terminated.exit_code, terminated.reason
    )
}

/// Errors reported by plugins through the plugin task's `annotations` result
fn plugin_errors(snapshot: &ResourceSnapshot) -> Vec<ErrorRecord> {
    let Some(annotations) = snapshot.result(PLUGIN_ANNOTATIONS_RESULT) else {
        return Vec::new();
    };

    let errors = embedded_object(annotations.clone())
        .and_then(|mut annotations| annotations.remove(PLUGINS_METADATA_KEY))
        .and_then(embedded_object)
        .and_then(|mut metadata| metadata.remove(PLUGIN_ERRORS_KEY))
        .and_then(embedded_object);

    let Some(errors) = errors else {
        warn!(
            "Task run '{}' has malformed plugin annotations: {}",
            snapshot.name, annotations
        );
        return Vec::new();
    };

    errors
        .into_iter()
        .map(|(plugin, error)| match error {
            Value::String(detail) => ErrorRecord::plugin(plugin, detail),
            other => ErrorRecord::plugin(plugin, other.to_string()),
        })
        .collect()
}

/// An object given either inline or as a JSON-encoded string
fn embedded_object(value: Value) -> Option<serde_json::Map<String, Value>> {
    match decode_result(value) {
        Value::Object(object) => Some(object),
        _ => None,
    }
}

/// Round-robin over the log streams of every discovered task run
///
/// Task runs discovered while streams are active join the rotation at the
/// start of the next full pass.
pub struct InterleavedLogs {
    client: PipelineClient,
    discovered: UnboundedReceiver<Result<Vec<ChildReference>>>,
    discovery: JoinHandle<()>,
    discovering: bool,
    active: VecDeque<(String, LogLines)>,
    /// Streams left to visit in the current pass
    rotation: usize,
}

impl InterleavedLogs {
    /// Next `(task name, line)`; `None` once no stream remains and no more
    /// task runs will be discovered
    pub async fn next(&mut self) -> Result<Option<(String, String)>> {
        loop {
            if self.rotation == 0 {
                self.take_discovered()?;
                self.rotation = self.active.len();
            }

            if let Some((task, mut lines)) = self.active.pop_front() {
                self.rotation = self.rotation.saturating_sub(1);
                if let Some(line) = lines.next().await? {
                    self.active.push_back((task.clone(), lines));
                    return Ok(Some((task, line)));
                }
                debug!("logs of task '{}' finished", task);
                continue;
            }

            if !self.discovering {
                return Ok(None);
            }

            match self.discovered.recv().await {
                Some(batch) => self.start(batch?),
                None => self.discovering = false,
            }
        }
    }

    /// Starts streams for every batch discovered so far, without waiting
    fn take_discovered(&mut self) -> Result<()> {
        while self.discovering {
            match self.discovered.try_recv() {
                Ok(batch) => self.start(batch?),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.discovering = false,
            }
        }
        Ok(())
    }

    fn start(&mut self, batch: Vec<ChildReference>) {
        for child in batch {
            let lines = TaskRunLogs::new(self.client.clone(), child.name.clone()).stream();
            self.active.push_back((child.task_name().to_string(), lines));
        }
    }
}

impl Drop for InterleavedLogs {
    fn drop(&mut self) {
        self.discovery.abort();
    }
}
