//! Condition domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::dto::resource::{RawCondition, RawStatus};

/// Reason reported while a resource is actively executing
pub const RUNNING_REASON: &str = "Running";

/// Tri-state status of a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    /// Parses the wire value. Anything unrecognised is `Unknown`.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("True") => Self::True,
            Some("False") => Self::False,
            _ => Self::Unknown,
        }
    }

    /// `True` or `False`: the resource reached an end state
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::True | Self::False)
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// First-class view of a resource condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    /// Completion time of the owning resource, if it reported one
    pub completion_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// Builds the ordered condition list of a status block
    pub fn list_from_status(status: &RawStatus) -> Vec<Condition> {
        let completion_time = status
            .completion_time
            .as_deref()
            .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
            .map(|time| time.with_timezone(&Utc));

        status
            .conditions
            .iter()
            .flatten()
            .map(|raw| Condition::from_raw(raw, completion_time))
            .collect()
    }

    fn from_raw(raw: &RawCondition, completion_time: Option<DateTime<Utc>>) -> Self {
        Self {
            status: ConditionStatus::parse(raw.status.as_deref()),
            reason: raw.reason.clone().unwrap_or_default(),
            message: raw.message.clone().unwrap_or_default(),
            completion_time,
        }
    }

    /// In progress: `Unknown` with reason `Running`
    pub fn is_running(&self) -> bool {
        self.status == ConditionStatus::Unknown && self.reason == RUNNING_REASON
    }

    /// The resource has started once it is running or has reached an end
    /// state. `Unknown` with any other reason means not yet started or being
    /// cancelled.
    pub fn has_started(&self) -> bool {
        self.status.is_terminal() || self.is_running()
    }

    pub fn has_completion_time(&self) -> bool {
        self.completion_time.is_some()
    }
}
