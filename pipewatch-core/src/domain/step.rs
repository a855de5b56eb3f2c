//! Step domain types

use serde::{Deserialize, Serialize};

/// Key under which a step publishes its structured failure message
pub const TASK_RESULT_KEY: &str = "task_result";

/// State of one step (container) of a task run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub container_name: String,
    /// Absent while the step is pending or running
    pub terminated: Option<TerminatedState>,
}

/// Terminal state of a step container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminatedState {
    pub exit_code: i32,
    pub reason: String,
    pub message: Option<String>,
}

/// One entry of the structured termination message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMessageEntry {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, rename = "type")]
    pub entry_type: Option<i64>,
}

impl StepResult {
    /// Terminated with a non-zero exit code
    pub fn has_failed(&self) -> bool {
        self.terminated
            .as_ref()
            .is_some_and(|terminated| terminated.exit_code != 0)
    }
}

impl TerminatedState {
    /// Decodes the embedded `task_result` entry of the termination message.
    ///
    /// Returns `Ok(None)` when there is no message or no such entry, and an
    /// error when the message is not the expected JSON list.
    pub fn task_result(&self) -> Result<Option<String>, serde_json::Error> {
        let Some(message) = self.message.as_deref().filter(|m| !m.is_empty()) else {
            return Ok(None);
        };

        let entries: Vec<StepMessageEntry> = serde_json::from_str(message)?;

        Ok(entries
            .into_iter()
            .find(|entry| entry.key == TASK_RESULT_KEY)
            .map(|entry| entry.value))
    }
}
