//! Task state machine and progress aggregation.

pub mod aggregator;
pub mod error;
pub mod id;
pub mod message;
pub mod record;
pub mod status;

pub use aggregator::ProgressAggregator;
pub use error::TaskError;
pub use id::TaskId;
pub use message::{MessageTracker, NewMessage};
pub use record::{NewTask, TaskStore};
pub use status::{
    derive_overall, MessageStatus, ProgressStatus, StepKind, StepOutcome, TaskStatus,
};
