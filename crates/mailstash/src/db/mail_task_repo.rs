//! Message task repository — per-message tracking rows in `mail_tasks`.
//!
//! A row is keyed by `(task_id, message_id)` where `message_id` is the
//! provisional id assigned at discovery time. The final `mail_id` is
//! nullable until the mail fetch step succeeds, and globally unique
//! when set (partial unique index).

use rusqlite::{params, Connection, Row};

use super::DatabaseError;

/// A raw message task row from the database.
#[derive(Debug, Clone)]
pub struct MailTaskRow {
    pub id: i64,
    pub task_id: String,
    pub message_id: String,
    pub mail_id: Option<String>,
    pub subject: Option<String>,
    pub sent_time: Option<String>,
    pub status: String,
    pub mail_fetch_status: String,
    pub attachment_status: String,
    pub ai_review_status: String,
    pub error_message: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl MailTaskRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            task_id: row.get("task_id")?,
            message_id: row.get("message_id")?,
            mail_id: row.get("mail_id")?,
            subject: row.get("subject")?,
            sent_time: row.get("sent_time")?,
            status: row.get("status")?,
            mail_fetch_status: row.get("mail_fetch_status")?,
            attachment_status: row.get("attachment_status")?,
            ai_review_status: row.get("ai_review_status")?,
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// Per-status record counts for one task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub error: i64,
    pub skipped: i64,
}

impl StatusCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.completed + self.error + self.skipped
    }

    /// Records whose overall status is terminal.
    pub fn processed(&self) -> i64 {
        self.completed + self.error + self.skipped
    }
}

/// Inserts a new message task row (without the autoincrement id).
pub fn insert(conn: &Connection, row: &MailTaskRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO mail_tasks (task_id, message_id, mail_id, subject, sent_time, status,
         mail_fetch_status, attachment_status, ai_review_status, error_message,
         created_at, started_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            row.task_id,
            row.message_id,
            row.mail_id,
            row.subject,
            row.sent_time,
            row.status,
            row.mail_fetch_status,
            row.attachment_status,
            row.ai_review_status,
            row.error_message,
            row.created_at,
            row.started_at,
            row.completed_at,
        ],
    )?;
    Ok(())
}

/// Finds the record for one message within a task.
pub fn find_by_key(
    conn: &Connection,
    task_id: &str,
    message_id: &str,
) -> Result<Option<MailTaskRow>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM mail_tasks WHERE task_id = ?1 AND message_id = ?2")?;
    let mut rows = stmt.query_map(params![task_id, message_id], MailTaskRow::from_row)?;
    match rows.next() {
        Some(Ok(row)) => Ok(Some(row)),
        Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
        None => Ok(None),
    }
}

/// Overwrites the mutable fields of an existing record, addressed by
/// `(task_id, message_id)`.
pub fn update(conn: &Connection, row: &MailTaskRow) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE mail_tasks SET mail_id = ?3, subject = ?4, sent_time = ?5, status = ?6,
         mail_fetch_status = ?7, attachment_status = ?8, ai_review_status = ?9,
         error_message = ?10, started_at = ?11, completed_at = ?12
         WHERE task_id = ?1 AND message_id = ?2",
        params![
            row.task_id,
            row.message_id,
            row.mail_id,
            row.subject,
            row.sent_time,
            row.status,
            row.mail_fetch_status,
            row.attachment_status,
            row.ai_review_status,
            row.error_message,
            row.started_at,
            row.completed_at,
        ],
    )?;
    Ok(())
}

/// Lists a task's message records, optionally filtered by overall status.
pub fn list_by_task(
    conn: &Connection,
    task_id: &str,
    status: Option<&str>,
) -> Result<Vec<MailTaskRow>, DatabaseError> {
    let mut rows = Vec::new();
    match status {
        Some(s) => {
            let mut stmt = conn.prepare(
                "SELECT * FROM mail_tasks WHERE task_id = ?1 AND status = ?2 ORDER BY id",
            )?;
            for row in stmt.query_map(params![task_id, s], MailTaskRow::from_row)? {
                rows.push(row?);
            }
        }
        None => {
            let mut stmt =
                conn.prepare("SELECT * FROM mail_tasks WHERE task_id = ?1 ORDER BY id")?;
            for row in stmt.query_map(params![task_id], MailTaskRow::from_row)? {
                rows.push(row?);
            }
        }
    }
    Ok(rows)
}

/// Counts a task's records by overall status in a single scan.
pub fn status_counts(conn: &Connection, task_id: &str) -> Result<StatusCounts, DatabaseError> {
    let mut stmt = conn
        .prepare("SELECT status, COUNT(*) FROM mail_tasks WHERE task_id = ?1 GROUP BY status")?;
    let mut counts = StatusCounts::default();
    let pairs = stmt.query_map(params![task_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    for pair in pairs {
        let (status, count) = pair?;
        match status.as_str() {
            "pending" => counts.pending = count,
            "processing" => counts.processing = count,
            "completed" => counts.completed = count,
            "error" => counts.error = count,
            "skipped" => counts.skipped = count,
            other => log::warn!("Unknown message status '{}' in mail_tasks", other),
        }
    }
    Ok(counts)
}

/// Returns the most recent error message among a task's errored records.
///
/// Skip reasons are also stored in `error_message` but do not count as
/// task errors, so the lookup is scoped to `status = 'error'`.
pub fn latest_error(conn: &Connection, task_id: &str) -> Result<Option<String>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT error_message FROM mail_tasks
         WHERE task_id = ?1 AND status = 'error' AND error_message IS NOT NULL
         ORDER BY completed_at DESC, id DESC LIMIT 1",
    )?;
    let mut rows = stmt.query_map(params![task_id], |row| row.get::<_, String>(0))?;
    match rows.next() {
        Some(Ok(msg)) => Ok(Some(msg)),
        Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
        None => Ok(None),
    }
}

/// Checks whether a final mail id is already claimed by any record.
pub fn mail_id_in_use(conn: &Connection, mail_id: &str) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM mail_tasks WHERE mail_id = ?1",
        params![mail_id],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}
