//! Watch protocol DTOs
//!
//! The watch endpoint streams newline-delimited JSON objects of the form
//! `{"type": "...", "object": {...}}`, one per change notification.

use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// Kind of change announced by a watch event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEventKind {
    Added,
    Modified,
    Deleted,
    Error,
    /// Any other declared type, such as `BOOKMARK`
    Other(String),
}

impl WatchEventKind {
    /// Parses the wire name of an event type
    pub fn parse(value: &str) -> Self {
        match value {
            "ADDED" => Self::Added,
            "MODIFIED" => Self::Modified,
            "DELETED" => Self::Deleted,
            "ERROR" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for WatchEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Added => "ADDED",
            Self::Modified => "MODIFIED",
            Self::Deleted => "DELETED",
            Self::Error => "ERROR",
            Self::Other(name) => name,
        };
        f.write_str(name)
    }
}

/// One decoded watch notification
///
/// Transient: the client only uses it as a trigger to fetch a fresh snapshot.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub object: serde_json::Value,
}

/// Reasons a watch line is rejected
#[derive(Debug, Error)]
pub enum WatchDecodeError {
    #[error("cannot decode watch event: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("watch event has no 'type'")]
    MissingType,

    #[error("watch event has no 'object'")]
    MissingObject,
}

#[derive(Deserialize)]
struct RawWatchEvent {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    object: Option<serde_json::Value>,
}

impl WatchEvent {
    /// Decodes a single line of the watch stream
    pub fn from_line(line: &str) -> Result<Self, WatchDecodeError> {
        let raw: RawWatchEvent = serde_json::from_str(line)?;

        let object = raw.object.ok_or(WatchDecodeError::MissingObject)?;
        let kind = raw.kind.ok_or(WatchDecodeError::MissingType)?;

        Ok(Self {
            kind: WatchEventKind::parse(&kind),
            object,
        })
    }
}
