//! Task repository — CRUD operations for the `task_info` table.

use rusqlite::{params, Connection, Row};

use super::DatabaseError;

/// A raw task row from the database.
#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: String,
    pub account_id: String,
    pub from_folder_id: String,
    pub from_folder_name: Option<String>,
    pub to_folder_id: Option<String>,
    pub to_folder_name: Option<String>,
    pub start_date: String,
    pub end_date: String,
    pub mail_count: i64,
    pub ai_review: bool,
    pub file_download: bool,
    pub exclude_extensions: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            account_id: row.get("account_id")?,
            from_folder_id: row.get("from_folder_id")?,
            from_folder_name: row.get("from_folder_name")?,
            to_folder_id: row.get("to_folder_id")?,
            to_folder_name: row.get("to_folder_name")?,
            start_date: row.get("start_date")?,
            end_date: row.get("end_date")?,
            mail_count: row.get("mail_count")?,
            ai_review: row.get("ai_review")?,
            file_download: row.get("file_download")?,
            exclude_extensions: row.get("exclude_extensions")?,
            status: row.get("status")?,
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts a new task row.
pub fn insert(conn: &Connection, task: &TaskRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO task_info (id, account_id, from_folder_id, from_folder_name,
         to_folder_id, to_folder_name, start_date, end_date, mail_count, ai_review,
         file_download, exclude_extensions, status, error_message, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            task.id,
            task.account_id,
            task.from_folder_id,
            task.from_folder_name,
            task.to_folder_id,
            task.to_folder_name,
            task.start_date,
            task.end_date,
            task.mail_count,
            task.ai_review,
            task.file_download,
            task.exclude_extensions,
            task.status,
            task.error_message,
            task.created_at,
            task.updated_at,
        ],
    )?;
    Ok(())
}

/// Finds a task by its id.
pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<TaskRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM task_info WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], TaskRow::from_row)?;
    match rows.next() {
        Some(Ok(row)) => Ok(Some(row)),
        Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
        None => Ok(None),
    }
}

/// Lists tasks, newest first, optionally filtered by status.
pub fn list(conn: &Connection, status: Option<&str>) -> Result<Vec<TaskRow>, DatabaseError> {
    let (sql, filter): (&str, Vec<&dyn rusqlite::types::ToSql>) = match status {
        Some(ref s) => (
            "SELECT * FROM task_info WHERE status = ?1 ORDER BY id DESC",
            vec![s],
        ),
        None => ("SELECT * FROM task_info ORDER BY id DESC", vec![]),
    };
    let mut stmt = conn.prepare(sql)?;
    let rows: Vec<TaskRow> = stmt
        .query_map(filter.as_slice(), TaskRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Updates only the status, error message, and updated_at of a task.
pub fn update_status(
    conn: &Connection,
    id: &str,
    status: &str,
    error_message: Option<&str>,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE task_info SET status = ?2, error_message = ?3, updated_at = ?4 WHERE id = ?1",
        params![id, status, error_message, updated_at],
    )?;
    Ok(())
}

/// Updates the informational mail count.
pub fn update_mail_count(
    conn: &Connection,
    id: &str,
    mail_count: i64,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE task_info SET mail_count = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, mail_count, updated_at],
    )?;
    Ok(())
}
