//! Task pipeline error types.

use thiserror::Error;

use crate::db::DatabaseError;

/// Errors from task, message record, and aggregate operations.
#[derive(Error, Debug)]
pub enum TaskError {
    /// Malformed id, timestamp, or extraction window. Rejected before
    /// anything is persisted.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Attempted to create a record that already exists. The caller
    /// should look the record up instead.
    #[error("Record already exists: {0}")]
    DuplicateKey(String),

    /// Operated on an unknown task or record. Surfaced, not retried.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Attempted a status regression (e.g. out of a terminal status).
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Underlying database failure.
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}
