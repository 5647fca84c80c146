//! Status enums for tasks, message records, steps, and aggregates.
//!
//! Statuses are persisted as lowercase strings; every enum round-trips
//! through `as_str` / `parse`.

use serde::{Deserialize, Serialize};

use super::error::TaskError;

/// Status of a top-level extraction task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Created,
    Processing,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Created => "created",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Result<Self, TaskError> {
        match s {
            "created" => Ok(TaskStatus::Created),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "error" => Ok(TaskStatus::Error),
            other => Err(TaskError::Validation(format!(
                "unknown task status '{}'",
                other
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error)
    }

    /// Task status only moves forward: created -> processing -> {completed, error}.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Created, TaskStatus::Processing) => true,
            (TaskStatus::Created, TaskStatus::Completed) => true,
            (TaskStatus::Created, TaskStatus::Error) => true,
            (TaskStatus::Processing, TaskStatus::Completed) => true,
            (TaskStatus::Processing, TaskStatus::Error) => true,
            _ => false,
        }
    }
}

/// Overall status of one message's extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Processing,
    Completed,
    Error,
    Skipped,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Processing => "processing",
            MessageStatus::Completed => "completed",
            MessageStatus::Error => "error",
            MessageStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Result<Self, TaskError> {
        match s {
            "pending" => Ok(MessageStatus::Pending),
            "processing" => Ok(MessageStatus::Processing),
            "completed" => Ok(MessageStatus::Completed),
            "error" => Ok(MessageStatus::Error),
            "skipped" => Ok(MessageStatus::Skipped),
            other => Err(TaskError::Validation(format!(
                "unknown message status '{}'",
                other
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageStatus::Completed | MessageStatus::Error | MessageStatus::Skipped
        )
    }
}

/// The three independent extraction steps per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    MailFetch,
    Attachment,
    AiReview,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::MailFetch => "mail_fetch",
            StepKind::Attachment => "attachment",
            StepKind::AiReview => "ai_review",
        }
    }
}

/// Outcome of one extraction step for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Pending,
    Processing,
    Success,
    Error,
    NotRequired,
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::Pending => "pending",
            StepOutcome::Processing => "processing",
            StepOutcome::Success => "success",
            StepOutcome::Error => "error",
            StepOutcome::NotRequired => "not_required",
        }
    }

    pub fn parse(s: &str) -> Result<Self, TaskError> {
        match s {
            "pending" => Ok(StepOutcome::Pending),
            "processing" => Ok(StepOutcome::Processing),
            "success" => Ok(StepOutcome::Success),
            "error" => Ok(StepOutcome::Error),
            "not_required" => Ok(StepOutcome::NotRequired),
            other => Err(TaskError::Validation(format!(
                "unknown step outcome '{}'",
                other
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepOutcome::Success | StepOutcome::Error | StepOutcome::NotRequired
        )
    }
}

/// Derived status of an entire task's progress aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Pending,
    Processing,
    Completed,
    Error,
    Paused,
    NotRequired,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Pending => "pending",
            ProgressStatus::Processing => "processing",
            ProgressStatus::Completed => "completed",
            ProgressStatus::Error => "error",
            ProgressStatus::Paused => "paused",
            ProgressStatus::NotRequired => "not_required",
        }
    }

    pub fn parse(s: &str) -> Result<Self, TaskError> {
        match s {
            "pending" => Ok(ProgressStatus::Pending),
            "processing" => Ok(ProgressStatus::Processing),
            "completed" => Ok(ProgressStatus::Completed),
            "error" => Ok(ProgressStatus::Error),
            "paused" => Ok(ProgressStatus::Paused),
            "not_required" => Ok(ProgressStatus::NotRequired),
            other => Err(TaskError::Validation(format!(
                "unknown progress status '{}'",
                other
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressStatus::Completed | ProgressStatus::Error)
    }
}

/// Derives a message's overall status from its three step outcomes.
///
/// Any errored step marks the message as errored immediately, without
/// waiting for the remaining steps. Otherwise the message is completed
/// once every step is terminal, pending while nothing has started, and
/// processing in between. `Skipped` is never derived; it is forced by
/// the skip operation and sticks.
pub fn derive_overall(
    mail_fetch: StepOutcome,
    attachment: StepOutcome,
    ai_review: StepOutcome,
) -> MessageStatus {
    let steps = [mail_fetch, attachment, ai_review];

    if steps.iter().any(|s| *s == StepOutcome::Error) {
        return MessageStatus::Error;
    }
    if steps.iter().all(|s| s.is_terminal()) {
        return MessageStatus::Completed;
    }
    if steps.iter().all(|s| *s == StepOutcome::Pending) {
        return MessageStatus::Pending;
    }
    MessageStatus::Processing
}
