//! Mail store collaborator contracts.
//!
//! The extraction engine never talks to a mail server directly; it goes
//! through these traits so the store client, the attachment sink, and
//! the review backend stay pluggable (and mockable in tests).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by mail store collaborators.
#[derive(Error, Debug)]
pub enum MailSourceError {
    /// Failed to connect to or authenticate with the mail store.
    #[error("mail store connection failed: {0}")]
    ConnectionFailed(String),

    /// The requested folder does not exist in the store.
    #[error("folder '{0}' not found")]
    FolderNotFound(String),

    /// The message is gone or unreadable in the store.
    #[error("message '{0}' unavailable: {1}")]
    MessageUnavailable(String, String),

    /// Failed to save an attachment.
    #[error("attachment '{name}' failed: {reason}")]
    AttachmentFailed { name: String, reason: String },

    /// The review backend rejected or failed the request.
    #[error("review failed: {0}")]
    ReviewFailed(String),

    /// IO error while persisting fetched content.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation timed out.
    #[error("operation timed out: {0}")]
    Timeout(String),
}

/// A message discovered by enumeration, identified by its provisional id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHandle {
    /// Provisional id, stable for the lifetime of the extraction run.
    pub provisional_id: String,
    pub subject: Option<String>,
    /// `YYYY-MM-DD HH:MM:SS`.
    pub sent_time: Option<String>,
    pub sender_name: Option<String>,
    pub has_attachments: bool,
    /// Attachment file names, used for the exclusion policy.
    pub attachment_names: Vec<String>,
}

/// A fully fetched message as stored by the archive.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    /// Final id assigned by the mail store on archival.
    pub mail_id: String,
    pub provisional_id: String,
    pub subject: Option<String>,
    pub sent_time: Option<String>,
    pub sender_name: Option<String>,
    pub folder_id: Option<String>,
    pub unread: bool,
    pub size: i64,
    pub attachments: Vec<AttachmentRef>,
}

/// One attachment of a fetched message.
#[derive(Debug, Clone)]
pub struct AttachmentRef {
    pub name: String,
    pub size: i64,
}

/// Result of an AI content review.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResult {
    pub summary: String,
    /// Confidence in [0.0, 1.0].
    pub score: f64,
}

/// The inclusive extraction window of a task.
#[derive(Debug, Clone)]
pub struct ExtractionWindow {
    /// `YYYY-MM-DD HH:MM:SS`, inclusive.
    pub start: String,
    /// `YYYY-MM-DD HH:MM:SS`, inclusive.
    pub end: String,
}

/// A mail store the engine can enumerate and fetch from.
///
/// Implementations must hand out provisional ids that stay stable for
/// the duration of a run and must move fetched messages to the target
/// folder when one is configured.
pub trait MailSource: Send + Sync {
    /// Enumerates messages in a folder within the window.
    fn list_messages(
        &self,
        folder_id: &str,
        window: &ExtractionWindow,
    ) -> Result<Vec<MessageHandle>, MailSourceError>;

    /// Fetches one message, archives it, and optionally saves its
    /// attachments. Returns the archived form with its final id.
    fn fetch_message(
        &self,
        provisional_id: &str,
        download_attachments: bool,
    ) -> Result<FetchedMessage, MailSourceError>;
}

/// Review backend applied to fetched messages when the task asks for it.
pub trait AiReviewer: Send + Sync {
    fn review(&self, message: &FetchedMessage) -> Result<ReviewResult, MailSourceError>;
}

/// Folder metadata lookup, used to snapshot folder names and counters.
pub trait FolderDirectory: Send + Sync {
    /// Resolves a folder's display name and path, if the folder exists.
    fn folder_path(&self, folder_id: &str) -> Result<Option<String>, MailSourceError>;
}
