//! Failure diagnostics

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a failure was reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorScope {
    Plugin,
    Task,
    Step,
    Pipeline,
}

/// One contributing failure. Records are kept in discovery order and never
/// deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub scope: ErrorScope,
    /// Plugin name, task name, `task/step`, or pipeline run name
    pub identifier: String,
    pub detail: String,
}

impl ErrorRecord {
    pub fn new(scope: ErrorScope, identifier: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            scope,
            identifier: identifier.into(),
            detail: detail.into(),
        }
    }

    pub fn plugin(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(ErrorScope::Plugin, name, detail)
    }

    pub fn task(task: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(ErrorScope::Task, task, detail)
    }

    pub fn step(task: &str, step: &str, detail: impl Into<String>) -> Self {
        Self::new(ErrorScope::Step, format!("{}/{}", task, step), detail)
    }

    pub fn pipeline(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(ErrorScope::Pipeline, name, detail)
    }

    /// Renders a list of records as one message, one record per line
    pub fn render(records: &[ErrorRecord]) -> String {
        records
            .iter()
            .map(|record| format!("{}\n", record))
            .collect()
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = match self.scope {
            ErrorScope::Plugin => "plugin",
            ErrorScope::Task => "task",
            ErrorScope::Step => "step",
            ErrorScope::Pipeline => "pipeline run",
        };
        write!(f, "Error in {} {}: {};", scope, self.identifier, self.detail)
    }
}
