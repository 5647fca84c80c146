//! Runtime settings loaded from a JSON file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Database file path; defaults to `~/.mailstash/data/mailstash.db`.
    pub database_path: Option<PathBuf>,
    /// Directory attachments are saved under.
    pub attachment_dir: Option<PathBuf>,
    /// Extraction worker threads; 0 means one per CPU.
    pub worker_count: usize,
    /// Extensions excluded by default when a task brings no list.
    pub default_exclude_extensions: Vec<String>,
    /// Capacity of the progress broadcast channel.
    pub broadcast_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: None,
            attachment_dir: None,
            worker_count: 0,
            default_exclude_extensions: Vec::new(),
            broadcast_capacity: 100,
        }
    }
}

impl Settings {
    /// Resolved worker count, never zero.
    pub fn effective_worker_count(&self) -> usize {
        if self.worker_count == 0 {
            num_cpus::get()
        } else {
            self.worker_count
        }
    }
}

pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    load_settings_from_str(&content)
}

pub fn load_settings_from_str(content: &str) -> Result<Settings, ConfigError> {
    let settings: Settings = serde_json::from_str(content)?;
    validate_settings(&settings)?;
    Ok(settings)
}

fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    if settings.broadcast_capacity == 0 {
        return Err(ConfigError::Validation {
            message: "broadcastCapacity must be greater than 0".to_string(),
        });
    }
    for ext in &settings.default_exclude_extensions {
        let trimmed = ext.trim().trim_start_matches('.');
        if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
            return Err(ConfigError::Validation {
                message: format!("invalid excluded extension '{ext}'"),
            });
        }
    }
    Ok(())
}
