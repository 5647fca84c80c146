//! Task identifiers and timestamp formats.
//!
//! Task ids are 14-digit strings derived from the creation time
//! (`YYYYMMDDhhmmss`) so they sort chronologically. Timestamps are
//! persisted as second-precision local-time strings in a fixed
//! `YYYY-MM-DD HH:MM:SS` layout and validated on write.

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::error::TaskError;

const TASK_ID_FORMAT: &str = "%Y%m%d%H%M%S";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A validated, sortable task identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Validates and wraps a task id string.
    ///
    /// The id must be exactly 14 ASCII digits and decompose into a valid
    /// calendar value (year/month/day/hour/minute/second).
    pub fn new(id: impl Into<String>) -> Result<Self, TaskError> {
        let id = id.into();
        if id.len() != 14 || !id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TaskError::Validation(format!(
                "task id '{}' is not a 14-digit string",
                id
            )));
        }
        NaiveDateTime::parse_from_str(&id, TASK_ID_FORMAT).map_err(|_| {
            TaskError::Validation(format!("task id '{}' is not a valid timestamp", id))
        })?;
        Ok(Self(id))
    }

    /// Creates a task id from the current local time.
    pub fn now() -> Self {
        Self(Local::now().format(TASK_ID_FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Formats a timestamp in the persisted layout.
pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Returns the current local time in the persisted layout.
pub fn now_string() -> String {
    format_timestamp(Local::now().naive_local())
}

/// Parses and validates a persisted timestamp string.
pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime, TaskError> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).map_err(|_| {
        TaskError::Validation(format!(
            "timestamp '{}' is not in YYYY-MM-DD HH:MM:SS format",
            s
        ))
    })
}
