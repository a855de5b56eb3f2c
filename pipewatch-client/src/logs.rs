//! Container log retrieval
//!
//! Logs are read either in one shot per container, or streamed line by line
//! while the pod runs. A streaming connection that the server closes after a
//! long silence is resumed with `sinceSeconds` instead of replaying the whole
//! history.

use pipewatch_core::ResourceSnapshot;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::Result;
use crate::transport::{ApiRequest, LineStream};
use crate::PipelineClient;

/// Full log text of one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLog {
    /// `None` when the pod's logs were fetched without naming a container
    pub container: Option<String>,
    pub text: String,
}

/// Result of a log read
pub enum LogOutput {
    Complete(Vec<SourceLog>),
    Stream(LogLines),
}

// =============================================================================
// Pods
// =============================================================================

/// Logs of one pod and its ordered containers
#[derive(Debug, Clone)]
pub struct PodLogs {
    client: PipelineClient,
    pod_name: String,
    containers: Vec<String>,
}

impl PodLogs {
    pub fn new(client: PipelineClient, pod_name: impl Into<String>, containers: Vec<String>) -> Self {
        Self {
            client,
            pod_name: pod_name.into(),
            containers,
        }
    }

    /// One fetch per known container; a single unlabeled fetch when no
    /// container is known
    pub async fn fetch_all(&self) -> Result<Vec<SourceLog>> {
        if self.containers.is_empty() {
            let text = fetch(&self.client, &self.pod_name, None).await?;
            return Ok(vec![SourceLog { container: None, text }]);
        }

        let mut logs = Vec::with_capacity(self.containers.len());
        for container in &self.containers {
            debug!("Getting log for container {}", container);
            let text = fetch(&self.client, &self.pod_name, Some(container)).await?;
            logs.push(SourceLog {
                container: Some(container.clone()),
                text,
            });
        }
        Ok(logs)
    }

    /// Streams every container in order once the pod has started
    pub fn stream(self) -> LogLines {
        LogLines::new(self.client, Gate::Pod(self.pod_name), containers(self.containers))
    }

    pub async fn read(self, follow: bool, wait: bool) -> Result<LogOutput> {
        if follow || wait {
            return Ok(LogOutput::Stream(self.stream()));
        }
        Ok(LogOutput::Complete(self.fetch_all().await?))
    }
}

// =============================================================================
// Task runs
// =============================================================================

/// Logs of the pod hosting a task run's steps
#[derive(Debug, Clone)]
pub struct TaskRunLogs {
    client: PipelineClient,
    task_run_name: String,
}

impl TaskRunLogs {
    pub fn new(client: PipelineClient, task_run_name: impl Into<String>) -> Self {
        Self {
            client,
            task_run_name: task_run_name.into(),
        }
    }

    /// Non-streaming logs of every step container.
    ///
    /// Empty when the task run does not exist or has no pod yet.
    pub async fn fetch_all(&self) -> Result<Vec<SourceLog>> {
        let snapshot = self.client.task_run(self.task_run_name.clone()).snapshot().await?;
        match snapshot.as_ref().and_then(|s| self.pod_logs(s)) {
            Some(pod) => pod.fetch_all().await,
            None => {
                debug!("task run '{}' has no pod", self.task_run_name);
                Ok(Vec::new())
            }
        }
    }

    /// Streams the step containers once the task run and its pod started
    pub fn stream(self) -> LogLines {
        LogLines::new(self.client, Gate::TaskRun(self.task_run_name), VecDeque::new())
    }

    pub async fn read(self, follow: bool, wait: bool) -> Result<LogOutput> {
        if follow || wait {
            return Ok(LogOutput::Stream(self.stream()));
        }
        Ok(LogOutput::Complete(self.fetch_all().await?))
    }

    fn pod_logs(&self, snapshot: &ResourceSnapshot) -> Option<PodLogs> {
        let pod_name = snapshot.pod_reference.clone()?;
        Some(PodLogs::new(self.client.clone(), pod_name, snapshot.step_containers()))
    }
}

async fn fetch(client: &PipelineClient, pod_name: &str, container: Option<&str>) -> Result<String> {
    let mut request = ApiRequest::get(client.log_path(pod_name));
    if let Some(container) = container {
        request = request.with_query("container", container);
    }

    let response = client.transport().send(request).await?;
    Ok(client.check_response(response)?.body)
}

fn containers(names: Vec<String>) -> VecDeque<Option<String>> {
    if names.is_empty() {
        VecDeque::from([None])
    } else {
        names.into_iter().map(Some).collect()
    }
}

// =============================================================================
// Streaming
// =============================================================================

/// What must have started before logs can be read
enum Gate {
    TaskRun(String),
    Pod(String),
    Open(String),
}

/// Position in the current container's log
struct Cursor {
    container: Option<String>,
    since: Option<u64>,
    stream: Option<Box<dyn LineStream>>,
    last_activity: Instant,
}

/// Lazily streamed log lines of a pod's containers, read one container
/// after another
pub struct LogLines {
    client: PipelineClient,
    gate: Gate,
    pending: VecDeque<Option<String>>,
    cursor: Option<Cursor>,
    finished: bool,
}

impl LogLines {
    fn new(client: PipelineClient, gate: Gate, pending: VecDeque<Option<String>>) -> Self {
        Self {
            client,
            gate,
            pending,
            cursor: None,
            finished: false,
        }
    }

    /// Next log line; `None` once every container is done or the owning
    /// resource never started
    pub async fn next(&mut self) -> Result<Option<String>> {
        if self.finished {
            return Ok(None);
        }

        let Some(pod_name) = self.open_gate().await? else {
            self.finished = true;
            return Ok(None);
        };

        loop {
            if self.cursor.is_none() {
                let Some(container) = self.pending.pop_front() else {
                    self.finished = true;
                    return Ok(None);
                };
                self.cursor = Some(Cursor {
                    container,
                    since: None,
                    stream: None,
                    last_activity: Instant::now(),
                });
            }

            let Some(cursor) = self.cursor.as_mut() else {
                continue;
            };

            let Some(stream) = cursor.stream.as_mut() else {
                cursor.last_activity = Instant::now();
                let request = stream_request(&self.client, &pod_name, cursor);
                debug!(
                    "Streaming logs for container {}",
                    cursor.container.as_deref().unwrap_or("<default>")
                );
                match self.client.transport().stream(request).await {
                    Ok(stream) => cursor.stream = Some(stream),
                    Err(e) if e.is_transient() => self.disconnected(),
                    Err(e) => {
                        self.finished = true;
                        return Err(e);
                    }
                }
                continue;
            };

            match stream.next_line().await {
                Ok(Some(line)) => {
                    cursor.last_activity = Instant::now();
                    return Ok(Some(line));
                }
                Ok(None) => self.disconnected(),
                Err(e) if e.is_transient() => {
                    debug!("log stream interrupted: {}", e);
                    self.disconnected();
                }
                Err(e) => {
                    self.finished = true;
                    return Err(e);
                }
            }
        }
    }

    /// Waits for the owning resources to start; returns the pod to read from
    async fn open_gate(&mut self) -> Result<Option<String>> {
        loop {
            match &self.gate {
                Gate::Open(pod_name) => return Ok(Some(pod_name.clone())),
                Gate::TaskRun(name) => {
                    let tracker = self.client.task_run(name.clone());
                    let Some(snapshot) = tracker.wait_for_start().await? else {
                        return Ok(None);
                    };
                    let Some(pod_name) = snapshot.pod_reference.clone() else {
                        warn!("task run '{}' started without a pod", snapshot.name);
                        return Ok(None);
                    };
                    self.pending = containers(snapshot.step_containers());
                    self.gate = Gate::Pod(pod_name);
                }
                Gate::Pod(pod_name) => {
                    let pod_name = pod_name.clone();
                    if self.client.pod(pod_name.clone()).wait_for_start().await?.is_none() {
                        return Ok(None);
                    }
                    self.gate = Gate::Open(pod_name);
                }
            }
        }
    }

    /// Decides between resuming the current container and moving on
    fn disconnected(&mut self) {
        let min_idle = self.client.config().logs.min_idle_timeout;
        let Some(cursor) = self.cursor.as_mut() else {
            return;
        };

        cursor.stream = None;
        let idle = cursor.last_activity.elapsed();
        debug!("connection closed after {}s", idle.as_secs());

        if idle < min_idle {
            self.cursor = None;
            return;
        }

        let since = idle.saturating_sub(Duration::from_secs(1)).as_secs();
        debug!("fetching logs starting from {}s ago", since);
        cursor.since = Some(since);
    }
}

fn stream_request(client: &PipelineClient, pod_name: &str, cursor: &Cursor) -> ApiRequest {
    let mut request = ApiRequest::get(client.log_path(pod_name))
        .with_query("follow", true)
        .with_header("Connection", "close");
    if let Some(container) = &cursor.container {
        request = request.with_query("container", container);
    }
    if let Some(since) = cursor.since {
        request = request.with_query("sinceSeconds", since);
    }
    request
}

impl LogOutput {
    /// Collects the whole output as text, draining a stream to its end
    pub async fn into_text(self) -> Result<String> {
        match self {
            LogOutput::Complete(logs) => Ok(logs.into_iter().map(|log| log.text).collect()),
            LogOutput::Stream(mut lines) => {
                let mut text = String::new();
                while let Some(line) = lines.next().await? {
                    text.push_str(&line);
                    text.push('\n');
                }
                Ok(text)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::{self, FakeReply, FakeStep, FakeTransport};
    use crate::transport::Method;
    use pipewatch_core::{PodKind, TaskRunKind};
    use serde_json::json;
    use std::sync::Arc;

    const POD: &str = "pod-1";

    fn started_pod(fake: &Arc<FakeTransport>, client: &PipelineClient) {
        let pod = fake::pod(POD, "Running");
        fake.set_resource(client.resource_path::<PodKind>(POD), pod.clone());
        fake.push_stream(
            client.watch_path::<PodKind>(POD),
            vec![FakeStep::Line(fake::watch_line("ADDED", &pod))],
        );
    }

    fn started_task_run(fake: &Arc<FakeTransport>, client: &PipelineClient, steps: serde_json::Value) {
        let task_run = fake::task_run("tr", Some(("Unknown", "Running")), "", false, Some(POD), steps);
        fake.set_resource(client.resource_path::<TaskRunKind>("tr"), task_run.clone());
        fake.push_stream(
            client.watch_path::<TaskRunKind>("tr"),
            vec![FakeStep::Line(fake::watch_line("ADDED", &task_run))],
        );
    }

    async fn drain(mut lines: LogLines) -> Vec<String> {
        let mut collected = Vec::new();
        while let Some(line) = lines.next().await.unwrap() {
            collected.push(line);
        }
        collected
    }

    #[tokio::test(start_paused = true)]
    async fn test_resumes_after_idle_disconnect() {
        let fake = FakeTransport::new();
        let client = fake::client(&fake);
        started_pod(&fake, &client);
        let log = client.log_path(POD);

        fake.push_stream(
            &log,
            vec![
                FakeStep::Line("first".to_string()),
                FakeStep::Idle(Duration::from_secs(90)),
            ],
        );
        fake.push_stream(&log, vec![FakeStep::Line("second".to_string())]);

        let lines = PodLogs::new(client.clone(), POD, vec!["step-build".to_string()]).stream();
        assert_eq!(drain(lines).await, vec!["first", "second"]);

        let requests = fake.requests_to(&log);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].query_value("sinceSeconds"), None);
        assert_eq!(requests[0].query_value("follow"), Some("true"));
        assert_eq!(requests[0].query_value("container"), Some("step-build"));
        assert_eq!(requests[1].query_value("sinceSeconds"), Some("89"));
        assert_eq!(requests[1].query_value("container"), Some("step-build"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_idle_ends_container() {
        let fake = FakeTransport::new();
        let client = fake::client(&fake);
        started_pod(&fake, &client);
        let log = client.log_path(POD);

        fake.push_stream(
            &log,
            vec![
                FakeStep::Line("only".to_string()),
                FakeStep::Idle(Duration::from_secs(10)),
            ],
        );

        let lines = PodLogs::new(client.clone(), POD, vec!["step-build".to_string()]).stream();
        assert_eq!(drain(lines).await, vec!["only"]);
        assert_eq!(fake.requests_to(&log).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_measured_from_last_line() {
        let fake = FakeTransport::new();
        let client = fake::client(&fake);
        started_pod(&fake, &client);
        let log = client.log_path(POD);

        // long-running stream, but never silent for a full minute
        fake.push_stream(
            &log,
            vec![
                FakeStep::Idle(Duration::from_secs(50)),
                FakeStep::Line("a".to_string()),
                FakeStep::Idle(Duration::from_secs(50)),
                FakeStep::Line("b".to_string()),
                FakeStep::Idle(Duration::from_secs(30)),
            ],
        );

        let lines = PodLogs::new(client.clone(), POD, vec![]).stream();
        assert_eq!(drain(lines).await, vec!["a", "b"]);
        assert_eq!(fake.requests_to(&log).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_drop_after_idle_resumes() {
        let fake = FakeTransport::new();
        let client = fake::client(&fake);
        started_pod(&fake, &client);
        let log = client.log_path(POD);

        fake.push_stream(
            &log,
            vec![FakeStep::Idle(Duration::from_secs(120)), FakeStep::Drop],
        );
        fake.push_stream(&log, vec![FakeStep::Line("late".to_string())]);

        let lines = PodLogs::new(client.clone(), POD, vec![]).stream();
        assert_eq!(drain(lines).await, vec!["late"]);

        let requests = fake.requests_to(&log);
        assert_eq!(requests[1].query_value("sinceSeconds"), Some("119"));
        assert_eq!(requests[1].query_value("container"), None);
    }

    #[tokio::test]
    async fn test_rejected_stream_propagates() {
        let fake = FakeTransport::new();
        let client = fake::client(&fake);
        started_pod(&fake, &client);
        fake.push(
            Method::Get,
            client.log_path(POD),
            FakeReply::Response(400, "container not valid".to_string()),
        );

        let mut lines = PodLogs::new(client.clone(), POD, vec!["nope".to_string()]).stream();
        let err = lines.next().await.unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(lines.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_task_run_streams_containers_in_step_order() {
        let fake = FakeTransport::new();
        let client = fake::client(&fake);
        started_task_run(
            &fake,
            &client,
            json!([
                {"name": "clone", "container": "step-clone"},
                {"name": "build", "container": "step-build"},
            ]),
        );
        started_pod(&fake, &client);
        let log = client.log_path(POD);
        fake.push_stream(&log, vec![FakeStep::Line("cloning".to_string())]);
        fake.push_stream(
            &log,
            vec![
                FakeStep::Line("building".to_string()),
                FakeStep::Line("done".to_string()),
            ],
        );

        let lines = TaskRunLogs::new(client.clone(), "tr").stream();
        assert_eq!(drain(lines).await, vec!["cloning", "building", "done"]);

        let containers: Vec<_> = fake
            .requests_to(&log)
            .iter()
            .map(|r| r.query_value("container").map(str::to_string))
            .collect();
        assert_eq!(
            containers,
            vec![Some("step-clone".to_string()), Some("step-build".to_string())]
        );
    }

    #[tokio::test]
    async fn test_task_run_deleted_before_start_yields_nothing() {
        let fake = FakeTransport::new();
        let client = fake::client(&fake);
        let get = client.resource_path::<TaskRunKind>("tr");
        let pending = fake::task_run("tr", Some(("Unknown", "Pending")), "", false, None, json!([]));
        fake.set_resource(&get, pending.clone());
        fake.push_stream(
            client.watch_path::<TaskRunKind>("tr"),
            vec![FakeStep::LineThenSet(fake::watch_line("DELETED", &pending), get.clone(), None)],
        );

        let lines = TaskRunLogs::new(client.clone(), "tr").stream();
        assert!(drain(lines).await.is_empty());
        assert!(fake.requests_to(&client.log_path(POD)).is_empty());
    }

    #[tokio::test]
    async fn test_fetch_all_per_container() {
        let fake = FakeTransport::new();
        let client = fake::client(&fake);
        let log = client.log_path(POD);
        fake.push(Method::Get, &log, FakeReply::Response(200, "a\n".to_string()));
        fake.push(Method::Get, &log, FakeReply::Response(200, "b\n".to_string()));

        let logs = PodLogs::new(
            client.clone(),
            POD,
            vec!["step-a".to_string(), "step-b".to_string()],
        )
        .fetch_all()
        .await
        .unwrap();

        assert_eq!(
            logs,
            vec![
                SourceLog {
                    container: Some("step-a".to_string()),
                    text: "a\n".to_string()
                },
                SourceLog {
                    container: Some("step-b".to_string()),
                    text: "b\n".to_string()
                },
            ]
        );
        let requests = fake.requests_to(&log);
        assert_eq!(requests[1].query_value("container"), Some("step-b"));
        assert_eq!(requests[1].query_value("follow"), None);
    }

    #[tokio::test]
    async fn test_fetch_all_without_containers() {
        let fake = FakeTransport::new();
        let client = fake::client(&fake);
        let log = client.log_path(POD);
        fake.push(Method::Get, &log, FakeReply::Response(200, "whole log".to_string()));

        let output = PodLogs::new(client.clone(), POD, vec![]).read(false, false).await.unwrap();
        let LogOutput::Complete(logs) = output else {
            panic!("expected complete logs");
        };
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].container, None);
        assert_eq!(logs[0].text, "whole log");
        assert_eq!(fake.requests_to(&log)[0].query_value("container"), None);
    }

    #[tokio::test]
    async fn test_task_run_fetch_all_resolves_pod() {
        let fake = FakeTransport::new();
        let client = fake::client(&fake);
        fake.set_resource(
            client.resource_path::<TaskRunKind>("tr"),
            fake::task_run(
                "tr",
                Some(("True", "Succeeded")),
                "",
                true,
                Some(POD),
                json!([{"name": "build"}]),
            ),
        );
        let log = client.log_path(POD);
        fake.push(Method::Get, &log, FakeReply::Response(200, "built".to_string()));

        let text = TaskRunLogs::new(client.clone(), "tr")
            .read(false, false)
            .await
            .unwrap()
            .into_text()
            .await
            .unwrap();
        assert_eq!(text, "built");
        // container name defaults to step-<name>
        assert_eq!(fake.requests_to(&log)[0].query_value("container"), Some("step-build"));

        let missing = TaskRunLogs::new(client.clone(), "gone").fetch_all().await.unwrap();
        assert!(missing.is_empty());
    }
}
