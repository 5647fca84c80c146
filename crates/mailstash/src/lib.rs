pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod mail;
pub mod task;

pub use broadcast::{TaskProgressBroadcaster, TaskProgressEvent};
pub use config::{load_settings, Settings};
pub use db::Database;
pub use error::{ConfigError, MailstashError, Result};
pub use extract::{ExclusionFilter, ExtractionService};
pub use mail::{AiReviewer, FolderDirectory, MailSource, MailSourceError};
pub use task::{
    MessageStatus, MessageTracker, ProgressAggregator, ProgressStatus, StepKind, StepOutcome,
    TaskError, TaskId, TaskStatus, TaskStore,
};
