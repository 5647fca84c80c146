use std::path::PathBuf;

use thiserror::Error;

use crate::db::error::DatabaseError;
use crate::mail::MailSourceError;
use crate::task::error::TaskError;

#[derive(Error, Debug)]
pub enum MailstashError {
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Mail source error: {0}")]
    Mail(#[from] MailSourceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Settings validation failed: {message}")]
    Validation { message: String },
}

pub type Result<T> = std::result::Result<T, MailstashError>;
