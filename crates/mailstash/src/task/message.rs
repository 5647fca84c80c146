//! Per-message tracking: step outcomes, derived overall status, skip.
//!
//! Every mutation goes through a per-record lock so the
//! read-modify-write on a record is serialized, then notifies the
//! aggregator to recompute the owning task's rollup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::db::error::DatabaseError;
use crate::db::mail_task_repo::{self, MailTaskRow};
use crate::db::{mail_repo, Database};
use crate::task::aggregator::ProgressAggregator;
use crate::task::error::TaskError;
use crate::task::id::now_string;
use crate::task::status::{derive_overall, MessageStatus, StepKind, StepOutcome};

/// Input for registering a message under a task.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub task_id: String,
    /// Provisional id from enumeration; unique within the task.
    pub message_id: String,
    pub subject: Option<String>,
    pub sent_time: Option<String>,
}

/// Tracks per-message step outcomes and drives the progress rollup.
pub struct MessageTracker {
    db: Database,
    aggregator: Arc<ProgressAggregator>,
    locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

impl MessageTracker {
    pub fn new(db: Database, aggregator: Arc<ProgressAggregator>) -> Self {
        Self {
            db,
            aggregator,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn record_lock(&self, task_id: &str, message_id: &str) -> Result<Arc<Mutex<()>>, TaskError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| TaskError::Database(DatabaseError::LockPoisoned))?;
        Ok(locks
            .entry((task_id.to_string(), message_id.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    // terminal records take no further mutations, so their lock entry
    // can go; a late caller just gets a fresh one
    fn discard_lock(&self, task_id: &str, message_id: &str) {
        if let Ok(mut locks) = self.locks.lock() {
            locks.remove(&(task_id.to_string(), message_id.to_string()));
        }
    }

    /// Registers a message under its task with every step pending.
    pub fn create(&self, new: NewMessage) -> Result<MailTaskRow, TaskError> {
        let row = MailTaskRow {
            id: 0,
            task_id: new.task_id.clone(),
            message_id: new.message_id.clone(),
            mail_id: None,
            subject: new.subject,
            sent_time: new.sent_time,
            status: MessageStatus::Pending.as_str().to_string(),
            mail_fetch_status: StepOutcome::Pending.as_str().to_string(),
            attachment_status: StepOutcome::Pending.as_str().to_string(),
            ai_review_status: StepOutcome::Pending.as_str().to_string(),
            error_message: None,
            created_at: now_string(),
            started_at: None,
            completed_at: None,
        };
        match self.db.with_conn(|conn| mail_task_repo::insert(conn, &row)) {
            Ok(()) => {}
            Err(e) if e.is_constraint_violation() => {
                return Err(TaskError::DuplicateKey(format!(
                    "message {} already tracked under task {}",
                    new.message_id, new.task_id
                )))
            }
            Err(e) => return Err(e.into()),
        }
        self.aggregator.on_record_changed(&new.task_id)?;
        self.get(&new.task_id, &new.message_id)
    }

    /// Reports a step outcome for a message.
    pub fn report_step(
        &self,
        task_id: &str,
        message_id: &str,
        step: StepKind,
        outcome: StepOutcome,
    ) -> Result<(), TaskError> {
        self.report_step_with_error(task_id, message_id, step, outcome, None)
    }

    /// Reports a step outcome with an optional error detail.
    ///
    /// Re-reporting the current outcome is a no-op. A step that already
    /// reached a terminal outcome keeps it; a conflicting later report
    /// is logged and dropped. Skipped messages ignore all reports.
    pub fn report_step_with_error(
        &self,
        task_id: &str,
        message_id: &str,
        step: StepKind,
        outcome: StepOutcome,
        error: Option<&str>,
    ) -> Result<(), TaskError> {
        if outcome == StepOutcome::Pending {
            return Err(TaskError::Validation(
                "pending is the initial step state and cannot be reported".to_string(),
            ));
        }

        let lock = self.record_lock(task_id, message_id)?;
        let (changed, terminal) = {
            let _guard = lock
                .lock()
                .map_err(|_| TaskError::Database(DatabaseError::LockPoisoned))?;

            let mut row = self.get(task_id, message_id)?;
            if MessageStatus::parse(&row.status)? == MessageStatus::Skipped {
                debug!("message {message_id} of task {task_id} is skipped; report ignored");
                (false, true)
            } else {
                let current = StepOutcome::parse(step_outcome(&row, step))?;
                if current == outcome {
                    (false, MessageStatus::parse(&row.status)?.is_terminal())
                } else if current.is_terminal() {
                    warn!(
                        "step {} of message {message_id} is already {} and will not move to {}",
                        step.as_str(),
                        current.as_str(),
                        outcome.as_str()
                    );
                    (false, MessageStatus::parse(&row.status)?.is_terminal())
                } else {
                    set_step_outcome(&mut row, step, outcome);
                    if outcome == StepOutcome::Error {
                        row.error_message = error.map(str::to_string);
                    }
                    if step == StepKind::MailFetch && outcome == StepOutcome::Success {
                        self.backfill_mail_id(&mut row)?;
                    }
                    self.apply_overall(&mut row)?;
                    self.write_record(&mut row)?;
                    (true, MessageStatus::parse(&row.status)?.is_terminal())
                }
            }
        };

        if changed {
            self.aggregator.on_record_changed(task_id)?;
        }
        if terminal {
            self.discard_lock(task_id, message_id);
        }
        Ok(())
    }

    /// Excludes a message from processing, recording the reason.
    ///
    /// Unfinished steps become not_required. Skipping an already skipped
    /// message is a no-op; a completed or failed message cannot be
    /// skipped anymore.
    pub fn skip(&self, task_id: &str, message_id: &str, reason: &str) -> Result<(), TaskError> {
        let lock = self.record_lock(task_id, message_id)?;
        let changed = {
            // both exits below leave the record terminal
            let _guard = lock
                .lock()
                .map_err(|_| TaskError::Database(DatabaseError::LockPoisoned))?;

            let mut row = self.get(task_id, message_id)?;
            let status = MessageStatus::parse(&row.status)?;
            match status {
                MessageStatus::Skipped => false,
                MessageStatus::Completed | MessageStatus::Error => {
                    return Err(TaskError::InvalidTransition {
                        from: status.as_str().to_string(),
                        to: MessageStatus::Skipped.as_str().to_string(),
                    })
                }
                MessageStatus::Pending | MessageStatus::Processing => {
                    for step in [StepKind::MailFetch, StepKind::Attachment, StepKind::AiReview] {
                        if !StepOutcome::parse(step_outcome(&row, step))?.is_terminal() {
                            set_step_outcome(&mut row, step, StepOutcome::NotRequired);
                        }
                    }
                    row.status = MessageStatus::Skipped.as_str().to_string();
                    row.error_message = Some(reason.to_string());
                    row.completed_at = Some(now_string());
                    self.db
                        .with_conn(|conn| mail_task_repo::update(conn, &row))?;
                    true
                }
            }
        };

        if changed {
            self.aggregator.on_record_changed(task_id)?;
        }
        self.discard_lock(task_id, message_id);
        Ok(())
    }

    /// Fetches a record, failing with `NotFound` when absent.
    pub fn get(&self, task_id: &str, message_id: &str) -> Result<MailTaskRow, TaskError> {
        self.db
            .with_conn(|conn| mail_task_repo::find_by_key(conn, task_id, message_id))?
            .ok_or_else(|| {
                TaskError::NotFound(format!("message {message_id} under task {task_id}"))
            })
    }

    /// Lists a task's records, optionally filtered by overall status.
    pub fn list(
        &self,
        task_id: &str,
        status: Option<MessageStatus>,
    ) -> Result<Vec<MailTaskRow>, TaskError> {
        let rows = self.db.with_conn(|conn| {
            mail_task_repo::list_by_task(conn, task_id, status.map(|s| s.as_str()))
        })?;
        Ok(rows)
    }

    /// Persists a record. When a freshly backfilled mail id turns out
    /// to have been claimed by another record between the uniqueness
    /// check and this write, the claim is dropped and the write retried
    /// once, so the step outcome itself is never lost.
    fn write_record(&self, row: &mut MailTaskRow) -> Result<(), TaskError> {
        match self.db.with_conn(|conn| mail_task_repo::update(conn, row)) {
            Ok(()) => Ok(()),
            Err(e) if e.is_constraint_violation() && row.mail_id.is_some() => {
                if let Some(claimed) = row.mail_id.take() {
                    warn!(
                        "mail id {claimed} was claimed concurrently; leaving {} unresolved",
                        row.message_id
                    );
                }
                self.db.with_conn(|conn| mail_task_repo::update(conn, row))?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Resolves the final mail id from the archived mail written under
    /// the record's provisional id. Resolution failures are logged and
    /// leave the id unset; they never fail the fetch report.
    fn backfill_mail_id(&self, row: &mut MailTaskRow) -> Result<(), TaskError> {
        if row.mail_id.is_some() {
            return Ok(());
        }
        let candidate = self
            .db
            .with_conn(|conn| mail_repo::find_latest_by_provisional(conn, &row.message_id))?;
        let Some(mail) = candidate else {
            warn!(
                "no archived mail found for provisional id {} of task {}",
                row.message_id, row.task_id
            );
            return Ok(());
        };
        if self
            .db
            .with_conn(|conn| mail_task_repo::mail_id_in_use(conn, &mail.id))?
        {
            warn!(
                "mail id {} is already claimed by another record; leaving {} unresolved",
                mail.id, row.message_id
            );
            return Ok(());
        }
        row.mail_id = Some(mail.id);
        Ok(())
    }

    /// Derives the overall status from the step outcomes and stamps the
    /// lifecycle timestamps.
    fn apply_overall(&self, row: &mut MailTaskRow) -> Result<(), TaskError> {
        let overall = derive_overall(
            StepOutcome::parse(&row.mail_fetch_status)?,
            StepOutcome::parse(&row.attachment_status)?,
            StepOutcome::parse(&row.ai_review_status)?,
        );
        row.status = overall.as_str().to_string();
        if overall != MessageStatus::Pending && row.started_at.is_none() {
            row.started_at = Some(now_string());
        }
        if overall.is_terminal() && row.completed_at.is_none() {
            row.completed_at = Some(now_string());
        }
        Ok(())
    }
}

fn step_outcome<'a>(row: &'a MailTaskRow, step: StepKind) -> &'a str {
    match step {
        StepKind::MailFetch => &row.mail_fetch_status,
        StepKind::Attachment => &row.attachment_status,
        StepKind::AiReview => &row.ai_review_status,
    }
}

fn set_step_outcome(row: &mut MailTaskRow, step: StepKind, outcome: StepOutcome) {
    let slot = match step {
        StepKind::MailFetch => &mut row.mail_fetch_status,
        StepKind::Attachment => &mut row.attachment_status,
        StepKind::AiReview => &mut row.ai_review_status,
    };
    *slot = outcome.as_str().to_string();
}
