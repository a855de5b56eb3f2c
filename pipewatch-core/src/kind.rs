//! Resource kind descriptors
//!
//! A single tracker implementation is shared by every kind the client
//! observes. Each kind only describes where it lives on the API server and
//! how its lifecycle conditions are read from the status block.

use crate::domain::condition::{Condition, ConditionStatus};
use crate::dto::resource::RawStatus;

/// API group a resource kind is served from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiGroup {
    /// The pipelines group (`apis/<group>/<version>`), version is configurable
    Pipelines,
    /// The core group (`api/v1`)
    Core,
}

/// Describes one kind of remote resource
pub trait ResourceKind: Send + Sync + 'static {
    /// Kind name as reported by the backend (e.g. "TaskRun")
    const KIND: &'static str;

    /// Plural path segment (e.g. "taskruns")
    const PLURAL: &'static str;

    /// API group serving this kind
    const GROUP: ApiGroup;

    /// Extracts the ordered condition list from a status block.
    ///
    /// Index 0 of the returned list is authoritative.
    fn extract_conditions(status: &RawStatus) -> Vec<Condition> {
        Condition::list_from_status(status)
    }
}

/// A pipeline run: one execution of a multi-task pipeline
#[derive(Debug, Clone, Copy)]
pub struct PipelineRunKind;

/// A task run: one execution of a single task, composed of steps
#[derive(Debug, Clone, Copy)]
pub struct TaskRunKind;

/// A pod hosting a task run's step containers
#[derive(Debug, Clone, Copy)]
pub struct PodKind;

impl ResourceKind for PipelineRunKind {
    const KIND: &'static str = "PipelineRun";
    const PLURAL: &'static str = "pipelineruns";
    const GROUP: ApiGroup = ApiGroup::Pipelines;
}

impl ResourceKind for TaskRunKind {
    const KIND: &'static str = "TaskRun";
    const PLURAL: &'static str = "taskruns";
    const GROUP: ApiGroup = ApiGroup::Pipelines;
}

impl ResourceKind for PodKind {
    const KIND: &'static str = "Pod";
    const PLURAL: &'static str = "pods";
    const GROUP: ApiGroup = ApiGroup::Core;

    /// Pods report a phase instead of conditions, so a synthetic condition is
    /// derived from it.
    fn extract_conditions(status: &RawStatus) -> Vec<Condition> {
        let Some(phase) = status.phase.as_deref() else {
            return Vec::new();
        };

        let status = match phase {
            "Succeeded" => ConditionStatus::True,
            "Failed" => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        };

        vec![Condition {
            status,
            reason: phase.to_string(),
            message: String::new(),
            completion_time: None,
        }]
    }
}
