//! Scripted in-memory backend for tests
//!
//! Resources live in a path -> document map served by GET. Scripted replies
//! take precedence and are consumed in order. Stream scripts can mutate the
//! stored resources as lines are delivered, which is how tests reproduce the
//! race between a watch notification and the follow-up GET.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{ApiRequest, ApiResponse, LineStream, Method, Transport};
use crate::config::Config;
use crate::error::{ClientError, Result};
use crate::PipelineClient;

/// One scripted reply
pub(crate) enum FakeReply {
    /// Full response with status and body
    Response(u16, String),
    /// Streaming response consumed step by step
    Stream(Vec<FakeStep>),
    /// Transient connection failure
    ConnectionError,
}

/// One step of a scripted stream
pub(crate) enum FakeStep {
    /// Deliver a line
    Line(String),
    /// Deliver a line, then store (or delete, with `None`) a resource
    LineThenSet(String, String, Option<Value>),
    /// Let time pass without output
    Idle(Duration),
    /// Break the connection
    Drop,
}

#[derive(Default)]
struct FakeState {
    requests: Vec<ApiRequest>,
    replies: HashMap<(Method, String), VecDeque<FakeReply>>,
    resources: HashMap<String, Value>,
}

#[derive(Default)]
pub(crate) struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn set_resource(&self, path: impl Into<String>, value: Value) {
        self.state.lock().unwrap().resources.insert(path.into(), value);
    }

    pub(crate) fn push(&self, method: Method, path: impl Into<String>, reply: FakeReply) {
        self.state
            .lock()
            .unwrap()
            .replies
            .entry((method, path.into()))
            .or_default()
            .push_back(reply);
    }

    pub(crate) fn push_stream(&self, path: impl Into<String>, steps: Vec<FakeStep>) {
        self.push(Method::Get, path, FakeReply::Stream(steps));
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub(crate) fn requests_to(&self, path: &str) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.path == path)
            .collect()
    }

    fn take_reply(&self, request: &ApiRequest) -> Option<FakeReply> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());
        state
            .replies
            .get_mut(&(request.method, request.path.clone()))
            .and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        match self.take_reply(&request) {
            Some(FakeReply::Response(status, body)) => return Ok(ApiResponse { status, body }),
            Some(FakeReply::ConnectionError) => {
                return Err(ClientError::Connection("connection reset".to_string()));
            }
            Some(FakeReply::Stream(_)) => panic!("stream scripted for a plain request"),
            None => {}
        }

        let state = self.state.lock().unwrap();
        match (request.method, state.resources.get(&request.path)) {
            (Method::Get, Some(value)) => Ok(ApiResponse {
                status: 200,
                body: value.to_string(),
            }),
            _ => Ok(ApiResponse {
                status: 404,
                body: format!("{} not found", request.path),
            }),
        }
    }

    async fn stream(&self, request: ApiRequest) -> Result<Box<dyn LineStream>> {
        match self.take_reply(&request) {
            Some(FakeReply::Stream(steps)) => Ok(Box::new(FakeStream {
                steps: steps.into(),
                state: Arc::clone(&self.state),
            })),
            Some(FakeReply::Response(status, body)) => Err(ClientError::api_error(status, body)),
            Some(FakeReply::ConnectionError) => {
                Err(ClientError::Connection("connection refused".to_string()))
            }
            None => Ok(Box::new(FakeStream {
                steps: VecDeque::new(),
                state: Arc::clone(&self.state),
            })),
        }
    }
}

struct FakeStream {
    steps: VecDeque<FakeStep>,
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl LineStream for FakeStream {
    async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            match self.steps.pop_front() {
                Some(FakeStep::Line(line)) => return Ok(Some(line)),
                Some(FakeStep::LineThenSet(line, path, value)) => {
                    let mut state = self.state.lock().unwrap();
                    match value {
                        Some(value) => state.resources.insert(path, value),
                        None => state.resources.remove(&path),
                    };
                    return Ok(Some(line));
                }
                Some(FakeStep::Idle(duration)) => tokio::time::sleep(duration).await,
                Some(FakeStep::Drop) => {
                    return Err(ClientError::Connection("connection reset by peer".to_string()));
                }
                None => return Ok(None),
            }
        }
    }
}

/// Client over a fake transport with zero retry delays
pub(crate) fn client(fake: &Arc<FakeTransport>) -> PipelineClient {
    let mut config = Config::new("https://api.example.test", "builds");
    config.watch.retry_delay = Duration::ZERO;
    config.conflict.delay = Duration::ZERO;
    PipelineClient::with_transport(config, Arc::clone(fake) as Arc<dyn Transport>)
}

/// Watch stream line for an object
pub(crate) fn watch_line(kind: &str, object: &Value) -> String {
    serde_json::json!({"type": kind, "object": object}).to_string()
}

/// Pipeline run document
pub(crate) fn pipeline_run(name: &str, condition: Option<(&str, &str)>, children: &[(&str, &str)]) -> Value {
    let children: Vec<Value> = children
        .iter()
        .map(|(task, run)| {
            serde_json::json!({
                "apiVersion": "tekton.dev/v1beta1",
                "kind": "TaskRun",
                "name": run,
                "pipelineTaskName": task,
            })
        })
        .collect();

    serde_json::json!({
        "kind": "PipelineRun",
        "metadata": {"name": name, "labels": {}, "annotations": {}},
        "status": {
            "conditions": conditions(condition, ""),
            "childReferences": children,
        }
    })
}

/// Task run document
pub(crate) fn task_run(
    name: &str,
    condition: Option<(&str, &str)>,
    message: &str,
    completed: bool,
    pod: Option<&str>,
    steps: Value,
) -> Value {
    let mut status = serde_json::json!({
        "conditions": conditions(condition, message),
        "steps": steps,
    });
    if completed {
        status["completionTime"] = Value::from("2024-03-01T10:00:00Z");
    }
    if let Some(pod) = pod {
        status["podName"] = Value::from(pod);
    }

    serde_json::json!({
        "kind": "TaskRun",
        "metadata": {"name": name},
        "status": status,
    })
}

/// Pod document in a phase
pub(crate) fn pod(name: &str, phase: &str) -> Value {
    serde_json::json!({
        "kind": "Pod",
        "metadata": {"name": name},
        "status": {"phase": phase},
    })
}

fn conditions(condition: Option<(&str, &str)>, message: &str) -> Value {
    match condition {
        Some((status, reason)) => serde_json::json!([{
            "type": "Succeeded",
            "status": status,
            "reason": reason,
            "message": message,
        }]),
        None => serde_json::json!([]),
    }
}
