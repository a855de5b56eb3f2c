//! Lifecycle classification
//!
//! How reasons map onto failed / cancelled / skipped differs between backend
//! versions, so the mapping is a value that callers can replace.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::condition::{Condition, ConditionStatus};

/// Coherent lifecycle state derived from a resource's first condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Reason classification policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePolicy {
    /// Reasons meaning the run was (or is being) cancelled
    pub cancelled_reasons: Vec<String>,
    /// Reasons meaning the task was skipped rather than run
    pub skipped_reasons: Vec<String>,
    /// Reasons meaning the run succeeded
    pub succeeded_reasons: Vec<String>,
}

impl Default for StatePolicy {
    fn default() -> Self {
        Self {
            cancelled_reasons: vec![
                "PipelineRunCancelled".to_string(),
                "TaskRunCancelled".to_string(),
                "Cancelled".to_string(),
            ],
            skipped_reasons: vec!["None".to_string()],
            succeeded_reasons: vec!["Succeeded".to_string()],
        }
    }
}

impl StatePolicy {
    pub fn is_cancelled(&self, reason: &str) -> bool {
        self.cancelled_reasons.iter().any(|r| r == reason)
    }

    pub fn is_skipped(&self, reason: &str) -> bool {
        self.skipped_reasons.iter().any(|r| r == reason)
    }

    pub fn is_succeeded(&self, reason: &str) -> bool {
        self.succeeded_reasons.iter().any(|r| r == reason)
    }

    /// Derives the lifecycle state from an optional first condition
    pub fn lifecycle(&self, condition: Option<&Condition>) -> LifecycleState {
        let Some(condition) = condition else {
            return LifecycleState::NotStarted;
        };

        if self.is_cancelled(&condition.reason) {
            return LifecycleState::Cancelled;
        }

        match condition.status {
            ConditionStatus::True => LifecycleState::Succeeded,
            ConditionStatus::False => LifecycleState::Failed,
            ConditionStatus::Unknown if condition.is_running() => LifecycleState::Running,
            ConditionStatus::Unknown => LifecycleState::NotStarted,
        }
    }

    /// Still in progress: `Unknown` and not being cancelled
    pub fn is_unfinished(&self, condition: &Condition) -> bool {
        condition.status == ConditionStatus::Unknown && !self.is_cancelled(&condition.reason)
    }

    /// Genuine failure of a task: `False`, finished, and not cancelled
    pub fn is_failed_task(&self, condition: &Condition) -> bool {
        condition.status == ConditionStatus::False
            && !self.is_cancelled(&condition.reason)
            && condition.has_completion_time()
    }

    pub fn is_cancelled_task(&self, condition: &Condition) -> bool {
        self.is_cancelled(&condition.reason)
    }

    /// Whether a finished task should contribute to the failure narrative
    pub fn reports_failure(&self, condition: &Condition) -> bool {
        condition.status.is_terminal()
            && !self.is_succeeded(&condition.reason)
            && !self.is_skipped(&condition.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn condition(status: ConditionStatus, reason: &str, completed: bool) -> Condition {
        Condition {
            status,
            reason: reason.to_string(),
            message: String::new(),
            completion_time: completed.then(Utc::now),
        }
    }

    #[test]
    fn test_cancelled_is_not_failed() {
        let policy = StatePolicy::default();

        let cancelled = condition(ConditionStatus::False, "TaskRunCancelled", true);
        assert!(!policy.is_failed_task(&cancelled));
        assert!(policy.is_cancelled_task(&cancelled));

        let failed = condition(ConditionStatus::False, "Failed", true);
        assert!(policy.is_failed_task(&failed));
        assert!(!policy.is_cancelled_task(&failed));

        let failing = condition(ConditionStatus::False, "Failed", false);
        assert!(!policy.is_failed_task(&failing));
    }

    #[test]
    fn test_lifecycle_states() {
        let policy = StatePolicy::default();

        assert_eq!(policy.lifecycle(None), LifecycleState::NotStarted);
        assert_eq!(
            policy.lifecycle(Some(&condition(ConditionStatus::Unknown, "Pending", false))),
            LifecycleState::NotStarted
        );
        assert_eq!(
            policy.lifecycle(Some(&condition(ConditionStatus::Unknown, "Running", false))),
            LifecycleState::Running
        );
        assert_eq!(
            policy.lifecycle(Some(&condition(ConditionStatus::True, "Succeeded", true))),
            LifecycleState::Succeeded
        );
        assert_eq!(
            policy.lifecycle(Some(&condition(ConditionStatus::False, "Failed", true))),
            LifecycleState::Failed
        );
        assert_eq!(
            policy.lifecycle(Some(&condition(
                ConditionStatus::Unknown,
                "PipelineRunCancelled",
                false
            ))),
            LifecycleState::Cancelled
        );
    }

    #[test]
    fn test_unfinished_while_unknown_and_not_cancelling() {
        let policy = StatePolicy::default();
        assert!(policy.is_unfinished(&condition(ConditionStatus::Unknown, "Running", false)));
        assert!(!policy.is_unfinished(&condition(
            ConditionStatus::Unknown,
            "PipelineRunCancelled",
            false
        )));
        assert!(!policy.is_unfinished(&condition(ConditionStatus::True, "Succeeded", true)));
    }

    #[test]
    fn test_skipped_and_succeeded_do_not_report_failure() {
        let policy = StatePolicy::default();
        assert!(!policy.reports_failure(&condition(ConditionStatus::True, "Succeeded", true)));
        assert!(!policy.reports_failure(&condition(ConditionStatus::False, "None", true)));
        assert!(!policy.reports_failure(&condition(ConditionStatus::Unknown, "Running", false)));
        assert!(policy.reports_failure(&condition(ConditionStatus::False, "Failed", true)));
    }
}
