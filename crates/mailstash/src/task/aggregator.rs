//! Task-level progress rollup.
//!
//! Progress is always recomputed from a full scan of the task's message
//! records, never maintained incrementally. A per-task lock serializes
//! the scan-then-write sequence so concurrent record updates cannot
//! interleave a stale rollup over a fresher one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;

use crate::broadcast::{TaskProgressBroadcaster, TaskProgressEvent};
use crate::db::error::DatabaseError;
use crate::db::progress_repo::{self, ProgressRow};
use crate::db::{mail_task_repo, task_repo, Database};
use crate::task::error::TaskError;
use crate::task::id::now_string;
use crate::task::record;
use crate::task::status::ProgressStatus;

/// Recomputes and persists per-task progress from message records.
pub struct ProgressAggregator {
    db: Database,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    broadcaster: Option<TaskProgressBroadcaster>,
}

impl ProgressAggregator {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            locks: Mutex::new(HashMap::new()),
            broadcaster: None,
        }
    }

    /// Attaches a broadcaster; every recomputation then emits one event.
    pub fn with_broadcaster(db: Database, broadcaster: TaskProgressBroadcaster) -> Self {
        Self {
            db,
            locks: Mutex::new(HashMap::new()),
            broadcaster: Some(broadcaster),
        }
    }

    fn task_lock(&self, task_id: &str) -> Result<Arc<Mutex<()>>, TaskError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| TaskError::Database(DatabaseError::LockPoisoned))?;
        Ok(locks
            .entry(task_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    // terminal progress only gets read; drop the lock entry so the map
    // does not grow with every task the process ever touched
    fn discard_lock(&self, task_id: &str) {
        if let Ok(mut locks) = self.locks.lock() {
            locks.remove(task_id);
        }
    }

    /// Creates the progress row for a task if it does not exist yet,
    /// seeded from whatever message records are already present.
    pub fn ensure_initialized(&self, task_id: &str) -> Result<ProgressRow, TaskError> {
        let lock = self.task_lock(task_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| TaskError::Database(DatabaseError::LockPoisoned))?;

        self.initialize_locked(task_id)
    }

    fn initialize_locked(&self, task_id: &str) -> Result<ProgressRow, TaskError> {
        if let Some(existing) = self
            .db
            .with_conn(|conn| progress_repo::find_by_task(conn, task_id))?
        {
            return Ok(existing);
        }

        let task = self
            .db
            .with_conn(|conn| task_repo::find_by_id(conn, task_id))?;
        if task.is_none() {
            return Err(TaskError::NotFound(format!("task {task_id}")));
        }

        let counts = self
            .db
            .with_conn(|conn| mail_task_repo::status_counts(conn, task_id))?;
        let row = ProgressRow {
            task_id: task_id.to_string(),
            total_messages: counts.total(),
            processed_messages: 0,
            successful_messages: 0,
            failed_messages: 0,
            skipped_messages: 0,
            status: ProgressStatus::Pending.as_str().to_string(),
            started_at: None,
            last_updated_at: Some(now_string()),
            completed_at: None,
            last_error: None,
        };
        self.db.with_conn(|conn| progress_repo::insert(conn, &row))?;
        debug!(
            "initialized progress for task {task_id} with {} records",
            row.total_messages
        );
        Ok(row)
    }

    /// Recomputes the task's progress after a message record changed.
    ///
    /// Scans all records, derives counters and status, writes the
    /// progress row, and mirrors a terminal result onto the task.
    pub fn on_record_changed(&self, task_id: &str) -> Result<ProgressRow, TaskError> {
        let lock = self.task_lock(task_id)?;
        let (row, status) = {
            let _guard = lock
                .lock()
                .map_err(|_| TaskError::Database(DatabaseError::LockPoisoned))?;

            let previous = self.initialize_locked(task_id)?;
            let (counts, last_error) = self.db.with_conn(|conn| {
                let counts = mail_task_repo::status_counts(conn, task_id)?;
                let last_error = mail_task_repo::latest_error(conn, task_id)?;
                Ok((counts, last_error))
            })?;

            let status = derive_progress(&counts, ProgressStatus::parse(&previous.status)?);
            let now = now_string();
            let row = ProgressRow {
                task_id: task_id.to_string(),
                total_messages: counts.total(),
                processed_messages: counts.processed(),
                successful_messages: counts.completed,
                failed_messages: counts.error,
                skipped_messages: counts.skipped,
                status: status.as_str().to_string(),
                started_at: match &previous.started_at {
                    Some(ts) => Some(ts.clone()),
                    None if status != ProgressStatus::Pending => Some(now.clone()),
                    None => None,
                },
                last_updated_at: Some(now.clone()),
                // set once on first terminal result, never cleared
                completed_at: match &previous.completed_at {
                    Some(ts) => Some(ts.clone()),
                    None if status.is_terminal() => Some(now.clone()),
                    None => None,
                },
                last_error,
            };

            self.db.with_conn(|conn| {
                progress_repo::update(conn, &row)?;
                if status.is_terminal() {
                    record::sync_status_on_conn(conn, task_id, status, row.last_error.as_deref())?;
                }
                Ok(())
            })?;

            (row, status)
        };

        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.send(TaskProgressEvent::from_row(&row, status));
        }
        if status.is_terminal() {
            self.discard_lock(task_id);
        }
        Ok(row)
    }

    /// Pauses a task's progress. Terminal progress cannot be paused.
    pub fn pause(&self, task_id: &str) -> Result<(), TaskError> {
        let lock = self.task_lock(task_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| TaskError::Database(DatabaseError::LockPoisoned))?;

        let row = self.initialize_locked(task_id)?;
        let status = ProgressStatus::parse(&row.status)?;
        if status.is_terminal() {
            return Err(TaskError::InvalidTransition {
                from: status.as_str().to_string(),
                to: ProgressStatus::Paused.as_str().to_string(),
            });
        }
        self.db
            .with_conn(|conn| progress_repo::set_paused(conn, task_id, &now_string()))?;
        Ok(())
    }

    /// Lifts a pause by recomputing from the records.
    pub fn resume(&self, task_id: &str) -> Result<ProgressRow, TaskError> {
        {
            let lock = self.task_lock(task_id)?;
            let _guard = lock
                .lock()
                .map_err(|_| TaskError::Database(DatabaseError::LockPoisoned))?;
            let row = self.initialize_locked(task_id)?;
            if ProgressStatus::parse(&row.status)? == ProgressStatus::Paused {
                // drop the pause so derivation runs unimpeded
                self.db.with_conn(|conn| {
                    progress_repo::update(
                        conn,
                        &ProgressRow {
                            status: ProgressStatus::Processing.as_str().to_string(),
                            ..row
                        },
                    )
                })?;
            }
        }
        self.on_record_changed(task_id)
    }

    /// Fetches the current progress row without recomputing.
    pub fn get(&self, task_id: &str) -> Result<ProgressRow, TaskError> {
        self.db
            .with_conn(|conn| progress_repo::find_by_task(conn, task_id))?
            .ok_or_else(|| TaskError::NotFound(format!("progress for task {task_id}")))
    }
}

/// Derives the rollup status from a full record scan.
///
/// No pending or processing records left means terminal: error when any
/// record failed, completed otherwise. A paused task stays paused until
/// either resumed or driven terminal; an empty task stays pending.
/// Records alone do not start a task: the rollup stays pending until
/// some record has actually moved, keeping the created-but-not-started
/// phase of the lifecycle observable.
fn derive_progress(
    counts: &mail_task_repo::StatusCounts,
    previous: ProgressStatus,
) -> ProgressStatus {
    if counts.total() == 0 {
        return if previous == ProgressStatus::Paused {
            ProgressStatus::Paused
        } else {
            ProgressStatus::Pending
        };
    }
    if counts.pending == 0 && counts.processing == 0 {
        return if counts.error > 0 {
            ProgressStatus::Error
        } else {
            ProgressStatus::Completed
        };
    }
    if previous == ProgressStatus::Paused {
        return ProgressStatus::Paused;
    }
    if counts.processing == 0 && counts.processed() == 0 {
        ProgressStatus::Pending
    } else {
        ProgressStatus::Processing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mail_task_repo::MailTaskRow;
    use crate::task::id::TaskId;
    use crate::task::record::{NewTask, TaskStore};

    fn setup() -> (Database, TaskStore, ProgressAggregator, String) {
        let db = Database::open_in_memory().unwrap();
        let store = TaskStore::new(db.clone());
        let task = store
            .create_with_id(
                TaskId::new("20260301120000").unwrap(),
                NewTask {
                    account_id: "acct-1".to_string(),
                    from_folder_id: "inbox".to_string(),
                    from_folder_name: None,
                    to_folder_id: None,
                    to_folder_name: None,
                    start_date: "2026-01-01 00:00:00".to_string(),
                    end_date: "2026-03-01 00:00:00".to_string(),
                    ai_review: false,
                    file_download: false,
                    exclude_extensions: vec![],
                },
            )
            .unwrap();
        let aggregator = ProgressAggregator::new(db.clone());
        (db, store, aggregator, task.id)
    }

    fn insert_record(db: &Database, task_id: &str, message_id: &str, status: &str) {
        let row = MailTaskRow {
            id: 0,
            task_id: task_id.to_string(),
            message_id: message_id.to_string(),
            mail_id: None,
            subject: None,
            sent_time: None,
            status: status.to_string(),
            mail_fetch_status: "pending".to_string(),
            attachment_status: "pending".to_string(),
            ai_review_status: "pending".to_string(),
            error_message: if status == "error" {
                Some(format!("{message_id} failed"))
            } else {
                None
            },
            created_at: now_string(),
            started_at: None,
            completed_at: None,
        };
        db.with_conn(|conn| mail_task_repo::insert(conn, &row)).unwrap();
    }

    #[test]
    fn test_initialize_empty_task() {
        let (_db, _store, aggregator, task_id) = setup();
        let row = aggregator.ensure_initialized(&task_id).unwrap();
        assert_eq!(row.status, "pending");
        assert_eq!(row.total_messages, 0);
        assert!(row.started_at.is_none());
    }

    #[test]
    fn test_initialize_unknown_task() {
        let (_db, _store, aggregator, _task_id) = setup();
        assert!(matches!(
            aggregator.ensure_initialized("20990101000000"),
            Err(TaskError::NotFound(_))
        ));
    }

    #[test]
    fn test_empty_task_stays_pending() {
        let (_db, _store, aggregator, task_id) = setup();
        let row = aggregator.on_record_changed(&task_id).unwrap();
        assert_eq!(row.status, "pending");
        assert_eq!(row.total_messages, 0);
        assert!(row.completed_at.is_none());
    }

    #[test]
    fn test_all_pending_records() {
        let (db, _store, aggregator, task_id) = setup();
        insert_record(&db, &task_id, "m1", "pending");
        insert_record(&db, &task_id, "m2", "pending");

        let row = aggregator.on_record_changed(&task_id).unwrap();
        assert_eq!(row.status, "pending");
        assert_eq!(row.total_messages, 2);
        assert_eq!(row.processed_messages, 0);
        assert!(row.started_at.is_none());
    }

    #[test]
    fn test_processing_records_do_not_count_as_processed() {
        let (db, _store, aggregator, task_id) = setup();
        insert_record(&db, &task_id, "m1", "processing");
        insert_record(&db, &task_id, "m2", "pending");

        let row = aggregator.on_record_changed(&task_id).unwrap();
        assert_eq!(row.status, "processing");
        assert_eq!(row.processed_messages, 0);
        assert!(row.started_at.is_some());
        assert!(row.completed_at.is_none());
    }

    #[test]
    fn test_mixed_terminal_with_error() {
        let (db, _store, aggregator, task_id) = setup();
        insert_record(&db, &task_id, "m1", "completed");
        insert_record(&db, &task_id, "m2", "error");
        insert_record(&db, &task_id, "m3", "skipped");

        let row = aggregator.on_record_changed(&task_id).unwrap();
        assert_eq!(row.status, "error");
        assert_eq!(row.total_messages, 3);
        assert_eq!(row.processed_messages, 3);
        assert_eq!(row.successful_messages, 1);
        assert_eq!(row.failed_messages, 1);
        assert_eq!(row.skipped_messages, 1);
        assert_eq!(row.last_error.as_deref(), Some("m2 failed"));
        assert!(row.completed_at.is_some());
    }

    #[test]
    fn test_all_completed_mirrors_task() {
        let (db, store, aggregator, task_id) = setup();
        store.start(&task_id).unwrap();
        insert_record(&db, &task_id, "m1", "completed");
        insert_record(&db, &task_id, "m2", "skipped");

        let row = aggregator.on_record_changed(&task_id).unwrap();
        assert_eq!(row.status, "completed");
        assert!(row.last_error.is_none());
        assert_eq!(store.get(&task_id).unwrap().status, "completed");
    }

    #[test]
    fn test_terminal_error_mirrors_task_error() {
        let (db, store, aggregator, task_id) = setup();
        store.start(&task_id).unwrap();
        insert_record(&db, &task_id, "m1", "error");

        aggregator.on_record_changed(&task_id).unwrap();
        let task = store.get(&task_id).unwrap();
        assert_eq!(task.status, "error");
        assert_eq!(task.error_message.as_deref(), Some("m1 failed"));
    }

    #[test]
    fn test_pause_preserved_until_terminal() {
        let (db, _store, aggregator, task_id) = setup();
        insert_record(&db, &task_id, "m1", "processing");
        aggregator.on_record_changed(&task_id).unwrap();
        aggregator.pause(&task_id).unwrap();

        insert_record(&db, &task_id, "m2", "pending");
        let row = aggregator.on_record_changed(&task_id).unwrap();
        assert_eq!(row.status, "paused");

        // a terminal result wins over the pause
        db.with_conn(|conn| {
            conn.execute("UPDATE mail_tasks SET status = 'completed'", [])?;
            Ok(())
        })
        .unwrap();
        let row = aggregator.on_record_changed(&task_id).unwrap();
        assert_eq!(row.status, "completed");
    }

    #[test]
    fn test_pause_rejected_when_terminal() {
        let (db, _store, aggregator, task_id) = setup();
        insert_record(&db, &task_id, "m1", "completed");
        aggregator.on_record_changed(&task_id).unwrap();
        assert!(matches!(
            aggregator.pause(&task_id),
            Err(TaskError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_resume_recomputes() {
        let (db, _store, aggregator, task_id) = setup();
        insert_record(&db, &task_id, "m1", "processing");
        aggregator.on_record_changed(&task_id).unwrap();
        aggregator.pause(&task_id).unwrap();

        let row = aggregator.resume(&task_id).unwrap();
        assert_eq!(row.status, "processing");
    }

    #[test]
    fn test_completed_at_never_cleared() {
        let (db, _store, aggregator, task_id) = setup();
        insert_record(&db, &task_id, "m1", "completed");
        let first = aggregator.on_record_changed(&task_id).unwrap();
        let completed_at = first.completed_at.clone().unwrap();

        // a late-arriving record reopens the rollup but keeps the stamp
        insert_record(&db, &task_id, "m2", "pending");
        let row = aggregator.on_record_changed(&task_id).unwrap();
        assert_eq!(row.status, "pending");
        assert_eq!(row.completed_at.as_deref(), Some(completed_at.as_str()));
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let (db, _store, aggregator, task_id) = setup();
        insert_record(&db, &task_id, "m1", "completed");
        let a = aggregator.on_record_changed(&task_id).unwrap();
        let b = aggregator.on_record_changed(&task_id).unwrap();
        assert_eq!(a.status, b.status);
        assert_eq!(a.processed_messages, b.processed_messages);
        assert_eq!(a.completed_at, b.completed_at);
    }

    #[test]
    fn test_task_lock_dropped_once_terminal() {
        let (db, _store, aggregator, task_id) = setup();
        insert_record(&db, &task_id, "m1", "processing");
        aggregator.on_record_changed(&task_id).unwrap();
        assert_eq!(aggregator.locks.lock().unwrap().len(), 1);

        let mut row = db
            .with_conn(|conn| mail_task_repo::find_by_key(conn, &task_id, "m1"))
            .unwrap()
            .unwrap();
        row.status = "completed".to_string();
        db.with_conn(|conn| mail_task_repo::update(conn, &row)).unwrap();

        aggregator.on_record_changed(&task_id).unwrap();
        assert!(aggregator.locks.lock().unwrap().is_empty());
    }

    #[test]
    fn test_broadcast_on_recompute() {
        let db = Database::open_in_memory().unwrap();
        let store = TaskStore::new(db.clone());
        let task = store
            .create_with_id(
                TaskId::new("20260301120000").unwrap(),
                NewTask {
                    account_id: "acct-1".to_string(),
                    from_folder_id: "inbox".to_string(),
                    from_folder_name: None,
                    to_folder_id: None,
                    to_folder_name: None,
                    start_date: "2026-01-01 00:00:00".to_string(),
                    end_date: "2026-03-01 00:00:00".to_string(),
                    ai_review: false,
                    file_download: false,
                    exclude_extensions: vec![],
                },
            )
            .unwrap();
        let broadcaster = TaskProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();
        let aggregator = ProgressAggregator::with_broadcaster(db.clone(), broadcaster);

        insert_record(&db, &task.id, "m1", "completed");
        aggregator.on_record_changed(&task.id).unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.task_id, task.id);
        assert_eq!(event.status, ProgressStatus::Completed);
        assert_eq!(event.processed, 1);
    }
}
