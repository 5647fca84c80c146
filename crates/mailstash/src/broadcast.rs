//! Task progress broadcaster for real-time progress streaming.
//!
//! The aggregator publishes one event per recomputation; UI or CLI
//! consumers subscribe for live progress display.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::db::progress_repo::ProgressRow;
use crate::task::id::now_string;
use crate::task::status::ProgressStatus;

/// A snapshot of one task's progress, emitted after every recomputation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgressEvent {
    /// Task this event belongs to.
    pub task_id: String,
    /// Derived overall status of the task.
    pub status: ProgressStatus,
    pub total: i64,
    pub processed: i64,
    pub successful: i64,
    pub failed: i64,
    pub skipped: i64,
    /// Timestamp of this event.
    pub timestamp: String,
    /// Most recent per-message error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl TaskProgressEvent {
    /// Builds an event from a freshly written progress row.
    pub fn from_row(row: &ProgressRow, status: ProgressStatus) -> Self {
        Self {
            task_id: row.task_id.clone(),
            status,
            total: row.total_messages,
            processed: row.processed_messages,
            successful: row.successful_messages,
            failed: row.failed_messages,
            skipped: row.skipped_messages,
            timestamp: now_string(),
            last_error: row.last_error.clone(),
        }
    }
}

/// Broadcasts task progress events to any number of subscribers.
#[derive(Clone)]
pub struct TaskProgressBroadcaster {
    sender: Arc<broadcast::Sender<TaskProgressEvent>>,
}

impl TaskProgressBroadcaster {
    /// Creates a broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends an event to all subscribers.
    pub fn send(&self, event: TaskProgressEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for TaskProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}
