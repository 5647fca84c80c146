//! Task lifecycle: creation, validation, and status transitions.

use log::warn;

use crate::db::{task_repo, Database};
use crate::task::error::TaskError;
use crate::task::id::{now_string, parse_timestamp, TaskId};
use crate::task::status::{ProgressStatus, TaskStatus};

/// Input for creating a new extraction task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub account_id: String,
    pub from_folder_id: String,
    pub from_folder_name: Option<String>,
    pub to_folder_id: Option<String>,
    pub to_folder_name: Option<String>,
    /// Inclusive window start, `YYYY-MM-DD HH:MM:SS`.
    pub start_date: String,
    /// Inclusive window end, `YYYY-MM-DD HH:MM:SS`.
    pub end_date: String,
    pub ai_review: bool,
    pub file_download: bool,
    /// Attachment extensions to exclude, without the leading dot.
    pub exclude_extensions: Vec<String>,
}

/// CRUD and lifecycle operations over the task_info table.
#[derive(Clone)]
pub struct TaskStore {
    db: Database,
}

impl TaskStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Creates a task with a fresh timestamp-derived id.
    pub fn create(&self, new: NewTask) -> Result<task_repo::TaskRow, TaskError> {
        self.create_with_id(TaskId::now(), new)
    }

    /// Creates a task under an explicit id. Fails with `DuplicateKey`
    /// if a task with that id already exists.
    pub fn create_with_id(
        &self,
        id: TaskId,
        new: NewTask,
    ) -> Result<task_repo::TaskRow, TaskError> {
        let start = parse_timestamp(&new.start_date)?;
        let end = parse_timestamp(&new.end_date)?;
        if end < start {
            return Err(TaskError::Validation(format!(
                "extraction window end {} precedes start {}",
                new.end_date, new.start_date
            )));
        }
        if new.account_id.trim().is_empty() {
            return Err(TaskError::Validation("account_id is empty".to_string()));
        }
        if new.from_folder_id.trim().is_empty() {
            return Err(TaskError::Validation("from_folder_id is empty".to_string()));
        }

        let now = now_string();
        let row = task_repo::TaskRow {
            id: id.as_str().to_string(),
            account_id: new.account_id,
            from_folder_id: new.from_folder_id,
            from_folder_name: new.from_folder_name,
            to_folder_id: new.to_folder_id,
            to_folder_name: new.to_folder_name,
            start_date: new.start_date,
            end_date: new.end_date,
            mail_count: 0,
            ai_review: new.ai_review,
            file_download: new.file_download,
            exclude_extensions: if new.exclude_extensions.is_empty() {
                None
            } else {
                Some(new.exclude_extensions.join(","))
            },
            status: TaskStatus::Created.as_str().to_string(),
            error_message: None,
            created_at: now.clone(),
            updated_at: now,
        };

        match self.db.with_conn(|conn| task_repo::insert(conn, &row)) {
            Ok(()) => Ok(row),
            Err(e) if e.is_constraint_violation() => Err(TaskError::DuplicateKey(format!(
                "task {} already exists",
                row.id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Fetches a task, failing with `NotFound` when absent.
    pub fn get(&self, task_id: &str) -> Result<task_repo::TaskRow, TaskError> {
        self.db
            .with_conn(|conn| task_repo::find_by_id(conn, task_id))?
            .ok_or_else(|| TaskError::NotFound(format!("task {task_id}")))
    }

    /// Lists tasks, optionally filtered by status, newest first.
    pub fn list(&self, status: Option<TaskStatus>) -> Result<Vec<task_repo::TaskRow>, TaskError> {
        let rows = self
            .db
            .with_conn(|conn| task_repo::list(conn, status.map(|s| s.as_str())))?;
        Ok(rows)
    }

    /// Moves a created task into processing.
    pub fn start(&self, task_id: &str) -> Result<(), TaskError> {
        self.transition(task_id, TaskStatus::Processing, None)
    }

    /// Marks a task failed at the task level, e.g. when message
    /// enumeration itself fails before any record exists.
    pub fn fail(&self, task_id: &str, message: &str) -> Result<(), TaskError> {
        self.transition(task_id, TaskStatus::Error, Some(message))
    }

    /// Records how many messages enumeration found.
    pub fn set_mail_count(&self, task_id: &str, count: i64) -> Result<(), TaskError> {
        let row = self.get(task_id)?;
        self.db.with_conn(|conn| {
            task_repo::update_mail_count(conn, &row.id, count, &now_string())
        })?;
        Ok(())
    }

    /// Polling variant of the aggregator's terminal-status mirror:
    /// copies a terminal progress result onto the task, no-op otherwise.
    pub fn sync_from_aggregate(&self, task_id: &str) -> Result<(), TaskError> {
        let progress = self
            .db
            .with_conn(|conn| crate::db::progress_repo::find_by_task(conn, task_id))?;
        let Some(progress) = progress else {
            return Ok(());
        };
        let status = ProgressStatus::parse(&progress.status)?;
        self.db.with_conn(|conn| {
            sync_status_on_conn(conn, task_id, status, progress.last_error.as_deref())
        })?;
        Ok(())
    }

    fn transition(
        &self,
        task_id: &str,
        next: TaskStatus,
        error_message: Option<&str>,
    ) -> Result<(), TaskError> {
        let row = self.get(task_id)?;
        let current = TaskStatus::parse(&row.status)?;
        if current == next {
            return Ok(());
        }
        if !current.can_transition_to(next) {
            return Err(TaskError::InvalidTransition {
                from: current.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        self.db.with_conn(|conn| {
            task_repo::update_status(conn, task_id, next.as_str(), error_message, &now_string())
        })?;
        Ok(())
    }
}

/// Mirrors a terminal progress result onto the owning task row.
///
/// Runs inside the aggregator's recomputation and must not fail it:
/// a task already terminal with a different status is logged and left
/// alone rather than overwritten.
pub(crate) fn sync_status_on_conn(
    conn: &rusqlite::Connection,
    task_id: &str,
    progress: ProgressStatus,
    last_error: Option<&str>,
) -> Result<(), crate::db::error::DatabaseError> {
    let next = match progress {
        ProgressStatus::Completed => TaskStatus::Completed,
        ProgressStatus::Error => TaskStatus::Error,
        _ => return Ok(()),
    };

    let Some(row) = task_repo::find_by_id(conn, task_id)? else {
        warn!("progress for task {task_id} has no task_info row");
        return Ok(());
    };
    let current = match TaskStatus::parse(&row.status) {
        Ok(s) => s,
        Err(_) => {
            warn!("task {task_id} has unrecognized status {:?}", row.status);
            return Ok(());
        }
    };
    if current == next {
        return Ok(());
    }
    if current.is_terminal() {
        warn!(
            "task {task_id} is already {} and will not move to {}",
            current.as_str(),
            next.as_str()
        );
        return Ok(());
    }
    task_repo::update_status(
        conn,
        task_id,
        next.as_str(),
        // keep the task-level error untouched on completion
        if next == TaskStatus::Error {
            last_error
        } else {
            row.error_message.as_deref()
        },
        &now_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn test_store() -> TaskStore {
        TaskStore::new(Database::open_in_memory().unwrap())
    }

    fn sample_new_task() -> NewTask {
        NewTask {
            account_id: "acct-1".to_string(),
            from_folder_id: "inbox".to_string(),
            from_folder_name: Some("Inbox".to_string()),
            to_folder_id: Some("archive".to_string()),
            to_folder_name: Some("Archive".to_string()),
            start_date: "2026-01-01 00:00:00".to_string(),
            end_date: "2026-01-31 23:59:59".to_string(),
            ai_review: true,
            file_download: true,
            exclude_extensions: vec!["exe".to_string(), "bat".to_string()],
        }
    }

    #[test]
    fn test_create_and_get() {
        let store = test_store();
        let row = store.create(sample_new_task()).unwrap();
        assert_eq!(row.status, "created");
        assert_eq!(row.exclude_extensions.as_deref(), Some("exe,bat"));

        let fetched = store.get(&row.id).unwrap();
        assert_eq!(fetched.account_id, "acct-1");
        assert_eq!(fetched.mail_count, 0);
    }

    #[test]
    fn test_create_rejects_inverted_window() {
        let store = test_store();
        let mut new = sample_new_task();
        new.start_date = "2026-02-01 00:00:00".to_string();
        new.end_date = "2026-01-01 00:00:00".to_string();
        assert!(matches!(
            store.create(new),
            Err(TaskError::Validation(_))
        ));
    }

    #[test]
    fn test_create_rejects_malformed_window() {
        let store = test_store();
        let mut new = sample_new_task();
        new.start_date = "01/01/2026".to_string();
        assert!(matches!(
            store.create(new),
            Err(TaskError::Validation(_))
        ));
    }

    #[test]
    fn test_create_with_duplicate_id() {
        let store = test_store();
        let id = TaskId::new("20260115103000").unwrap();
        store.create_with_id(id.clone(), sample_new_task()).unwrap();
        assert!(matches!(
            store.create_with_id(id, sample_new_task()),
            Err(TaskError::DuplicateKey(_))
        ));
    }

    #[test]
    fn test_get_missing_task() {
        let store = test_store();
        assert!(matches!(
            store.get("20260101000000"),
            Err(TaskError::NotFound(_))
        ));
    }

    #[test]
    fn test_start_transition() {
        let store = test_store();
        let row = store.create(sample_new_task()).unwrap();
        store.start(&row.id).unwrap();
        assert_eq!(store.get(&row.id).unwrap().status, "processing");

        // idempotent
        store.start(&row.id).unwrap();
        assert_eq!(store.get(&row.id).unwrap().status, "processing");
    }

    #[test]
    fn test_fail_records_message() {
        let store = test_store();
        let row = store.create(sample_new_task()).unwrap();
        store.start(&row.id).unwrap();
        store.fail(&row.id, "folder enumeration failed").unwrap();

        let fetched = store.get(&row.id).unwrap();
        assert_eq!(fetched.status, "error");
        assert_eq!(
            fetched.error_message.as_deref(),
            Some("folder enumeration failed")
        );
    }

    #[test]
    fn test_no_backward_transition() {
        let store = test_store();
        let row = store.create(sample_new_task()).unwrap();
        store.start(&row.id).unwrap();
        store.fail(&row.id, "boom").unwrap();
        assert!(matches!(
            store.start(&row.id),
            Err(TaskError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_list_filters_by_status() {
        let store = test_store();
        let a = store
            .create_with_id(TaskId::new("20260101000000").unwrap(), sample_new_task())
            .unwrap();
        let b = store
            .create_with_id(TaskId::new("20260102000000").unwrap(), sample_new_task())
            .unwrap();
        store.start(&b.id).unwrap();

        let created = store.list(Some(TaskStatus::Created)).unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].id, a.id);

        let all = store.list(None).unwrap();
        assert_eq!(all.len(), 2);
        // newest first
        assert_eq!(all[0].id, b.id);
    }

    #[test]
    fn test_set_mail_count() {
        let store = test_store();
        let row = store.create(sample_new_task()).unwrap();
        store.set_mail_count(&row.id, 42).unwrap();
        assert_eq!(store.get(&row.id).unwrap().mail_count, 42);
    }

    #[test]
    fn test_sync_status_respects_terminal_task() {
        let store = test_store();
        let row = store.create(sample_new_task()).unwrap();
        store.start(&row.id).unwrap();
        store.fail(&row.id, "boom").unwrap();

        store
            .db
            .with_conn(|conn| {
                sync_status_on_conn(conn, &row.id, ProgressStatus::Completed, None)
            })
            .unwrap();
        // terminal status is never overwritten
        assert_eq!(store.get(&row.id).unwrap().status, "error");
    }

    #[test]
    fn test_sync_from_aggregate_without_progress_row() {
        let store = test_store();
        let row = store.create(sample_new_task()).unwrap();
        store.sync_from_aggregate(&row.id).unwrap();
        assert_eq!(store.get(&row.id).unwrap().status, "created");
    }

    #[test]
    fn test_sync_status_promotes_to_completed() {
        let store = test_store();
        let row = store.create(sample_new_task()).unwrap();
        store.start(&row.id).unwrap();

        store
            .db
            .with_conn(|conn| {
                sync_status_on_conn(conn, &row.id, ProgressStatus::Completed, None)
            })
            .unwrap();
        assert_eq!(store.get(&row.id).unwrap().status, "completed");
    }
}
