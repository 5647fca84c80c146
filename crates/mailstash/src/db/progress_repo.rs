//! Task progress repository — the per-task rollup row in `task_progress`.

use rusqlite::{params, Connection, Row};
use serde::Serialize;

use super::DatabaseError;

/// A raw progress row from the database. One per task.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRow {
    pub task_id: String,
    pub total_messages: i64,
    pub processed_messages: i64,
    pub successful_messages: i64,
    pub failed_messages: i64,
    pub skipped_messages: i64,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ProgressRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            task_id: row.get("task_id")?,
            total_messages: row.get("total_messages")?,
            processed_messages: row.get("processed_messages")?,
            successful_messages: row.get("successful_messages")?,
            failed_messages: row.get("failed_messages")?,
            skipped_messages: row.get("skipped_messages")?,
            status: row.get("status")?,
            started_at: row.get("started_at")?,
            last_updated_at: row.get("last_updated_at")?,
            completed_at: row.get("completed_at")?,
            last_error: row.get("last_error")?,
        })
    }
}

/// Inserts a fresh progress row.
pub fn insert(conn: &Connection, row: &ProgressRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO task_progress (task_id, total_messages, processed_messages,
         successful_messages, failed_messages, skipped_messages, status,
         started_at, last_updated_at, completed_at, last_error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            row.task_id,
            row.total_messages,
            row.processed_messages,
            row.successful_messages,
            row.failed_messages,
            row.skipped_messages,
            row.status,
            row.started_at,
            row.last_updated_at,
            row.completed_at,
            row.last_error,
        ],
    )?;
    Ok(())
}

/// Finds the progress row for a task.
pub fn find_by_task(conn: &Connection, task_id: &str) -> Result<Option<ProgressRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM task_progress WHERE task_id = ?1")?;
    let mut rows = stmt.query_map(params![task_id], ProgressRow::from_row)?;
    match rows.next() {
        Some(Ok(row)) => Ok(Some(row)),
        Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
        None => Ok(None),
    }
}

/// Overwrites all mutable fields of a task's progress row.
pub fn update(conn: &Connection, row: &ProgressRow) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE task_progress SET total_messages = ?2, processed_messages = ?3,
         successful_messages = ?4, failed_messages = ?5, skipped_messages = ?6,
         status = ?7, started_at = ?8, last_updated_at = ?9, completed_at = ?10,
         last_error = ?11
         WHERE task_id = ?1",
        params![
            row.task_id,
            row.total_messages,
            row.processed_messages,
            row.successful_messages,
            row.failed_messages,
            row.skipped_messages,
            row.status,
            row.started_at,
            row.last_updated_at,
            row.completed_at,
            row.last_error,
        ],
    )?;
    Ok(())
}

/// Deletes a task's progress row (used when the owning task is removed).
pub fn delete_by_task(conn: &Connection, task_id: &str) -> Result<usize, DatabaseError> {
    let n = conn.execute(
        "DELETE FROM task_progress WHERE task_id = ?1",
        params![task_id],
    )?;
    Ok(n)
}

/// Sets the externally administered paused status.
pub fn set_paused(conn: &Connection, task_id: &str, updated_at: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE task_progress SET status = 'paused', last_updated_at = ?2 WHERE task_id = ?1",
        params![task_id, updated_at],
    )?;
    Ok(())
}
