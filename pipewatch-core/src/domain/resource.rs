//! Resource snapshot domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::condition::Condition;
use crate::domain::step::{StepResult, TerminatedState};
use crate::dto::resource::{RawChildReference, RawResource, RawResult, RawStatus, RawStep};
use crate::kind::ResourceKind;

/// Reference from a pipeline run to one of its child runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildReference {
    /// Kind of the child; non-task children are possible
    pub kind: Option<String>,
    /// Name of the child resource
    pub name: String,
    /// Name of the pipeline task the child executes
    pub pipeline_task_name: Option<String>,
}

impl ChildReference {
    /// Pipeline task name, falling back to the resource name
    pub fn task_name(&self) -> &str {
        self.pipeline_task_name.as_deref().unwrap_or(&self.name)
    }

    pub fn is_kind<K: ResourceKind>(&self) -> bool {
        self.kind.as_deref() == Some(K::KIND)
    }
}

/// A named pipeline or task result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedResult {
    pub name: String,
    pub value: serde_json::Value,
}

/// Typed snapshot of one resource, fetched fresh from the backend
///
/// Snapshots are never cached for decisions; a newer fetch always wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub kind: String,
    pub name: String,
    /// Ordered conditions; index 0 is authoritative
    pub conditions: Vec<Condition>,
    /// Child runs (pipeline runs only), in backend order
    pub children: Vec<ChildReference>,
    /// Pod hosting the steps (task runs only)
    pub pod_reference: Option<String>,
    /// Ordered steps (task runs only)
    pub steps: Vec<StepResult>,
    /// Declared results (task or pipeline results)
    pub results: Vec<NamedResult>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    /// The document as received
    pub raw: serde_json::Value,
}

impl ResourceSnapshot {
    /// Builds a snapshot of kind `K` from a resource document
    pub fn from_json<K: ResourceKind>(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let raw: RawResource = serde_json::from_value(value.clone())?;
        let metadata = raw.metadata.unwrap_or_default();
        let status = raw.status.unwrap_or_default();

        Ok(Self {
            kind: raw.kind.unwrap_or_else(|| K::KIND.to_string()),
            name: metadata.name.unwrap_or_default(),
            conditions: K::extract_conditions(&status),
            children: children(&status),
            pod_reference: status.pod_name.clone().filter(|name| !name.is_empty()),
            steps: status.steps.iter().flatten().map(step).collect(),
            results: results(&status),
            labels: metadata.labels.unwrap_or_default(),
            annotations: metadata.annotations.unwrap_or_default(),
            raw: value,
        })
    }

    /// The authoritative (first) condition, if any has been reported
    pub fn condition(&self) -> Option<&Condition> {
        self.conditions.first()
    }

    /// A snapshot without conditions has not been observed by the backend yet
    pub fn is_observed(&self) -> bool {
        !self.conditions.is_empty()
    }

    pub fn has_started(&self) -> bool {
        self.condition().is_some_and(Condition::has_started)
    }

    /// The top condition reached `True` or `False`
    pub fn is_terminal(&self) -> bool {
        self.condition().is_some_and(|c| c.status.is_terminal())
    }

    /// Children of kind `K`, in backend order
    pub fn children_of<K: ResourceKind>(&self) -> impl Iterator<Item = &ChildReference> {
        self.children.iter().filter(|child| child.is_kind::<K>())
    }

    /// Container names of the steps, in declared order
    pub fn step_containers(&self) -> Vec<String> {
        self.steps
            .iter()
            .map(|step| step.container_name.clone())
            .collect()
    }

    pub fn result(&self, name: &str) -> Option<&serde_json::Value> {
        self.results
            .iter()
            .find(|result| result.name == name)
            .map(|result| &result.value)
    }
}

fn children(status: &RawStatus) -> Vec<ChildReference> {
    status
        .child_references
        .iter()
        .flatten()
        .filter_map(|raw: &RawChildReference| {
            Some(ChildReference {
                kind: raw.kind.clone(),
                name: raw.name.clone()?,
                pipeline_task_name: raw.pipeline_task_name.clone(),
            })
        })
        .collect()
}

fn step(raw: &RawStep) -> StepResult {
    let name = raw.name.clone().unwrap_or_default();
    StepResult {
        container_name: raw
            .container
            .clone()
            .unwrap_or_else(|| format!("step-{}", name)),
        name,
        terminated: raw.terminated.as_ref().map(|terminated| TerminatedState {
            exit_code: terminated.exit_code.unwrap_or_default(),
            reason: terminated.reason.clone().unwrap_or_default(),
            message: terminated.message.clone(),
        }),
    }
}

fn results(status: &RawStatus) -> Vec<NamedResult> {
    [&status.task_results, &status.pipeline_results, &status.results]
        .into_iter()
        .flatten()
        .flatten()
        .map(|raw: &RawResult| NamedResult {
            name: raw.name.clone(),
            value: raw.value.clone(),
        })
        .collect()
}
