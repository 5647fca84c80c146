//! Extraction run orchestration.
//!
//! `ExtractionService` takes a created task end to end: load its
//! conditions, enumerate the window, register message records, apply
//! the exclusion policy, fan the remaining work out to the pool, and
//! hand back the final rollup. Runs are resumable; records that are
//! already terminal are left alone.

use std::sync::Arc;

use log::{debug, info, warn};
use uuid::Uuid;

use crate::broadcast::TaskProgressBroadcaster;
use crate::db::progress_repo::ProgressRow;
use crate::db::task_repo::TaskRow;
use crate::db::{folder_repo, Database};
use crate::error::Result;
use crate::extract::filter::ExclusionFilter;
use crate::extract::job::MessageJob;
use crate::extract::worker::{ExtractionContext, ExtractionPool};
use crate::mail::{AiReviewer, ExtractionWindow, FolderDirectory, MailSource};
use crate::task::aggregator::ProgressAggregator;
use crate::task::error::TaskError;
use crate::task::id::now_string;
use crate::task::message::{MessageTracker, NewMessage};
use crate::task::record::TaskStore;
use crate::task::status::{MessageStatus, TaskStatus};

/// The conditions an extraction run operates under, loaded from the task.
#[derive(Debug, Clone)]
pub struct ExtractionConditions {
    pub folder_id: String,
    pub window: ExtractionWindow,
    pub file_download: bool,
    pub ai_review: bool,
    pub filter: ExclusionFilter,
}

impl ExtractionConditions {
    pub fn from_task(task: &TaskRow) -> Self {
        Self {
            folder_id: task.from_folder_id.clone(),
            window: ExtractionWindow {
                start: task.start_date.clone(),
                end: task.end_date.clone(),
            },
            file_download: task.file_download,
            ai_review: task.ai_review,
            filter: ExclusionFilter::from_list(task.exclude_extensions.as_deref()),
        }
    }
}

/// Drives extraction tasks against a mail source.
pub struct ExtractionService {
    db: Database,
    tasks: TaskStore,
    tracker: Arc<MessageTracker>,
    aggregator: Arc<ProgressAggregator>,
    source: Arc<dyn MailSource>,
    reviewer: Option<Arc<dyn AiReviewer>>,
    directory: Option<Arc<dyn FolderDirectory>>,
    worker_count: usize,
}

impl ExtractionService {
    pub fn new(db: Database, source: Arc<dyn MailSource>) -> Self {
        let aggregator = Arc::new(ProgressAggregator::new(db.clone()));
        let tracker = Arc::new(MessageTracker::new(db.clone(), Arc::clone(&aggregator)));
        Self {
            tasks: TaskStore::new(db.clone()),
            tracker,
            aggregator,
            db,
            source,
            reviewer: None,
            directory: None,
            worker_count: num_cpus::get(),
        }
    }

    pub fn with_reviewer(mut self, reviewer: Arc<dyn AiReviewer>) -> Self {
        self.reviewer = Some(reviewer);
        self
    }

    pub fn with_directory(mut self, directory: Arc<dyn FolderDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count.max(1);
        self
    }

    /// Rewires progress events through the given broadcaster.
    pub fn with_broadcaster(mut self, broadcaster: TaskProgressBroadcaster) -> Self {
        let aggregator = Arc::new(ProgressAggregator::with_broadcaster(
            self.db.clone(),
            broadcaster,
        ));
        self.tracker = Arc::new(MessageTracker::new(self.db.clone(), Arc::clone(&aggregator)));
        self.aggregator = aggregator;
        self
    }

    pub fn tasks(&self) -> &TaskStore {
        &self.tasks
    }

    pub fn tracker(&self) -> &Arc<MessageTracker> {
        &self.tracker
    }

    pub fn aggregator(&self) -> &Arc<ProgressAggregator> {
        &self.aggregator
    }

    /// Runs a task to completion and returns its final progress.
    ///
    /// Safe to call again for a task that was interrupted: existing
    /// records are kept and only unfinished ones are reprocessed.
    pub fn run(&self, task_id: &str) -> Result<ProgressRow> {
        let task = self.tasks.get(task_id)?;
        let conditions = ExtractionConditions::from_task(&task);
        info!(
            "Starting extraction task {} on folder {} ({} .. {})",
            task.id, conditions.folder_id, conditions.window.start, conditions.window.end
        );

        if let Some(directory) = &self.directory {
            self.snapshot_folder(&task, directory.as_ref())?;
        }

        // reruns of an already started (or finished) task only recount
        if TaskStatus::parse(&task.status)? == TaskStatus::Created {
            self.tasks.start(task_id)?;
        }
        self.aggregator.ensure_initialized(task_id)?;

        let handles = match self
            .source
            .list_messages(&conditions.folder_id, &conditions.window)
        {
            Ok(handles) => handles,
            Err(e) => {
                self.tasks
                    .fail(task_id, &format!("message enumeration failed: {e}"))?;
                return Err(e.into());
            }
        };
        self.tasks.set_mail_count(task_id, handles.len() as i64)?;
        info!("Task {} enumerated {} messages", task.id, handles.len());

        let pool = ExtractionPool::new(
            Arc::new(ExtractionContext {
                db: self.db.clone(),
                tracker: Arc::clone(&self.tracker),
                source: Arc::clone(&self.source),
                reviewer: self.reviewer.clone(),
            }),
            self.worker_count,
        );

        let mut submitted = 0usize;
        for handle in handles {
            let message_id = if handle.provisional_id.is_empty() {
                Uuid::new_v4().to_string()
            } else {
                handle.provisional_id.clone()
            };

            match self.tracker.create(NewMessage {
                task_id: task_id.to_string(),
                message_id: message_id.clone(),
                subject: handle.subject.clone(),
                sent_time: handle.sent_time.clone(),
            }) {
                Ok(_) => {}
                Err(TaskError::DuplicateKey(_)) => {
                    debug!("Message {} already tracked; resuming", message_id);
                }
                Err(e) => return Err(e.into()),
            }

            if conditions.file_download
                && conditions.filter.all_excluded(&handle.attachment_names)
            {
                self.tracker.skip(
                    task_id,
                    &message_id,
                    "all attachments excluded by extension filter",
                )?;
                continue;
            }

            let record = self.tracker.get(task_id, &message_id)?;
            if MessageStatus::parse(&record.status)?.is_terminal() {
                debug!("Message {} is already terminal; not resubmitting", message_id);
                continue;
            }

            pool.submit(MessageJob {
                task_id: task_id.to_string(),
                message_id,
                download_attachments: conditions.file_download,
                ai_review: conditions.ai_review,
            })?;
            submitted += 1;
        }

        let mut failed = 0usize;
        for _ in 0..submitted {
            match pool.recv_result() {
                Some(result) => {
                    if result.status == MessageStatus::Error {
                        failed += 1;
                        warn!(
                            "Message {} of task {} failed: {}",
                            result.message_id,
                            result.task_id,
                            result.error.as_deref().unwrap_or("unknown error")
                        );
                    }
                }
                None => break,
            }
        }
        pool.shutdown();
        pool.wait();

        let progress = self.aggregator.on_record_changed(task_id)?;
        info!(
            "Extraction task {} finished: {} ({}/{} processed, {} failed)",
            task_id, progress.status, progress.processed_messages, progress.total_messages, failed
        );
        Ok(progress)
    }

    /// Refreshes the source folder's snapshot row. Lookup failures are
    /// logged; the run proceeds without the snapshot.
    fn snapshot_folder(&self, task: &TaskRow, directory: &dyn FolderDirectory) -> Result<()> {
        match directory.folder_path(&task.from_folder_id) {
            Ok(Some(path)) => {
                let name = task.from_folder_name.clone().unwrap_or_else(|| {
                    path.rsplit('/').next().unwrap_or(path.as_str()).to_string()
                });
                let row = folder_repo::FolderRow {
                    id: task.from_folder_id.clone(),
                    account_id: task.account_id.clone(),
                    name,
                    folder_path: Some(path),
                    item_count: 0,
                    updated_at: now_string(),
                };
                self.db.with_conn(|conn| folder_repo::upsert(conn, &row))?;
            }
            Ok(None) => {
                warn!("Folder {} not found in the directory", task.from_folder_id);
            }
            Err(e) => {
                warn!("Folder lookup for {} failed: {e}", task.from_folder_id);
            }
        }
        Ok(())
    }
}
