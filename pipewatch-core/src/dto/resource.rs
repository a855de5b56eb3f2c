//! Raw resource DTOs
//!
//! Mirrors the subset of the pipeline-run / task-run / pod JSON documents the
//! client reads. Unknown fields are ignored and missing ones default.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A resource document as returned by the snapshot endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawResource {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub metadata: Option<RawMetadata>,
    #[serde(default)]
    pub status: Option<RawStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub annotations: Option<BTreeMap<String, String>>,
}

/// Status block shared by every tracked kind
///
/// Pipeline runs fill `child_references` and `pipeline_results`, task runs
/// fill `pod_name`, `steps` and `task_results`, pods fill `phase`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStatus {
    #[serde(default)]
    pub conditions: Option<Vec<RawCondition>>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub completion_time: Option<String>,
    #[serde(default)]
    pub child_references: Option<Vec<RawChildReference>>,
    #[serde(default)]
    pub pod_name: Option<String>,
    #[serde(default)]
    pub steps: Option<Vec<RawStep>>,
    #[serde(default)]
    pub task_results: Option<Vec<RawResult>>,
    #[serde(default)]
    pub pipeline_results: Option<Vec<RawResult>>,
    #[serde(default)]
    pub results: Option<Vec<RawResult>>,
    #[serde(default)]
    pub phase: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCondition {
    #[serde(default, rename = "type")]
    pub condition_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChildReference {
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub pipeline_task_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStep {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub terminated: Option<RawTerminated>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTerminated {
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// A named result; values are strings on older backends and arbitrary JSON
/// on newer ones
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawResult {
    pub name: String,
    #[serde(default)]
    pub value: serde_json::Value,
}
