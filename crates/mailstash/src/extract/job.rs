//! Per-message work unit handed to the extraction pool.

use crate::task::status::MessageStatus;

/// One message's worth of extraction work.
#[derive(Debug, Clone)]
pub struct MessageJob {
    pub task_id: String,
    /// Provisional message id of the record to drive.
    pub message_id: String,
    /// Whether the task wants attachments saved.
    pub download_attachments: bool,
    /// Whether the task wants AI review.
    pub ai_review: bool,
}

/// Outcome of one processed job, as read back from the record.
#[derive(Debug, Clone)]
pub struct MessageJobResult {
    pub task_id: String,
    pub message_id: String,
    pub status: MessageStatus,
    pub error: Option<String>,
}
