//! Extraction drive: filtering, worker pool, and run orchestration.

pub mod filter;
pub mod job;
pub mod service;
pub mod worker;

pub use filter::ExclusionFilter;
pub use job::{MessageJob, MessageJobResult};
pub use service::{ExtractionConditions, ExtractionService};
pub use worker::{ExtractionContext, ExtractionPool};
