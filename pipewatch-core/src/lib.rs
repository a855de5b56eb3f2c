//! Pipewatch Core
//!
//! Core types for observing remote build pipelines.
//!
//! This crate contains:
//! - Domain types: snapshots of pipeline runs, task runs and pods, and the
//!   lifecycle rules derived from their conditions
//! - Resource kinds: descriptors telling the client where each kind lives
//! - DTOs: the wire shapes of resources and watch events

pub mod domain;
pub mod dto;
pub mod kind;

pub use domain::condition::{Condition, ConditionStatus};
pub use domain::diagnostics::{ErrorRecord, ErrorScope};
pub use domain::lifecycle::{LifecycleState, StatePolicy};
pub use domain::resource::{ChildReference, NamedResult, ResourceSnapshot};
pub use domain::step::{StepResult, TerminatedState};
pub use kind::{ApiGroup, PipelineRunKind, PodKind, ResourceKind, TaskRunKind};
