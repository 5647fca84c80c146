//! Extraction worker pool.
//!
//! Bounded crossbeam channels feed per-message jobs to a fixed set of
//! threads. Workers drive each message through the fetch, attachment,
//! and review steps, reporting every outcome through the tracker so the
//! record and the task rollup stay current even when a worker dies
//! mid-message.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, error, info, warn};

use crate::db::{mail_repo, Database};
use crate::extract::job::{MessageJob, MessageJobResult};
use crate::mail::{AiReviewer, FetchedMessage, MailSource};
use crate::task::error::TaskError;
use crate::task::id::now_string;
use crate::task::message::MessageTracker;
use crate::task::status::{MessageStatus, StepKind, StepOutcome};

/// Shared collaborators every worker thread needs.
pub struct ExtractionContext {
    pub db: Database,
    pub tracker: Arc<MessageTracker>,
    pub source: Arc<dyn MailSource>,
    pub reviewer: Option<Arc<dyn AiReviewer>>,
}

pub struct ExtractionPool {
    job_sender: Sender<MessageJob>,
    result_receiver: Receiver<MessageJobResult>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl ExtractionPool {
    /// Starts `worker_count` threads over the shared context.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn new(context: Arc<ExtractionContext>, worker_count: usize) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        let (job_sender, job_receiver) = bounded::<MessageJob>(worker_count * 2);
        // results are unbounded so a blocked submit can never deadlock
        // against workers waiting to hand results back
        let (result_sender, result_receiver) = unbounded::<MessageJobResult>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let ctx = Arc::clone(&context);
            workers.push(thread::spawn(move || {
                run_worker(worker_id, job_rx, result_tx, shutdown_flag, ctx);
            }));
        }

        info!("Started {} extraction workers", worker_count);

        Self {
            job_sender,
            result_receiver,
            workers,
            shutdown,
        }
    }

    pub fn submit(&self, job: MessageJob) -> Result<(), TaskError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(TaskError::Validation(
                "extraction pool is shut down".to_string(),
            ));
        }
        self.job_sender
            .send(job)
            .map_err(|_| TaskError::Validation("extraction job channel closed".to_string()))
    }

    pub fn recv_result(&self) -> Option<MessageJobResult> {
        self.result_receiver.recv().ok()
    }

    pub fn try_recv_result(&self) -> Option<MessageJobResult> {
        self.result_receiver.try_recv().ok()
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Drops the job channel and joins every worker.
    pub fn wait(self) {
        drop(self.job_sender);
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Extraction worker {} panicked: {:?}", i, e);
            } else {
                debug!("Extraction worker {} finished", i);
            }
        }
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<MessageJob>,
    result_sender: Sender<MessageJobResult>,
    shutdown: Arc<AtomicBool>,
    ctx: Arc<ExtractionContext>,
) {
    debug!("Extraction worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Extraction worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(job) => {
                debug!(
                    "Worker {} processing message {} of task {}",
                    worker_id, job.message_id, job.task_id
                );
                let result = match process_message(&ctx, &job) {
                    Ok(result) => result,
                    Err(e) => {
                        error!(
                            "Worker {} failed on message {}: {}",
                            worker_id, job.message_id, e
                        );
                        MessageJobResult {
                            task_id: job.task_id,
                            message_id: job.message_id,
                            status: MessageStatus::Error,
                            error: Some(e.to_string()),
                        }
                    }
                };
                if result_sender.send(result).is_err() {
                    error!("Worker {} failed to send result", worker_id);
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Extraction worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Extraction worker {} stopped", worker_id);
}

/// Drives one message through its three steps.
fn process_message(
    ctx: &ExtractionContext,
    job: &MessageJob,
) -> Result<MessageJobResult, TaskError> {
    let tracker = &ctx.tracker;
    tracker.report_step(
        &job.task_id,
        &job.message_id,
        StepKind::MailFetch,
        StepOutcome::Processing,
    )?;

    let fetched = match ctx
        .source
        .fetch_message(&job.message_id, job.download_attachments)
    {
        Ok(fetched) => fetched,
        Err(e) => {
            tracker.report_step_with_error(
                &job.task_id,
                &job.message_id,
                StepKind::MailFetch,
                StepOutcome::Error,
                Some(&e.to_string()),
            )?;
            tracker.report_step(
                &job.task_id,
                &job.message_id,
                StepKind::Attachment,
                StepOutcome::NotRequired,
            )?;
            tracker.report_step(
                &job.task_id,
                &job.message_id,
                StepKind::AiReview,
                StepOutcome::NotRequired,
            )?;
            return read_back(ctx, job);
        }
    };

    // archive before reporting success so the final id resolves
    archive_fetched(&ctx.db, &fetched)?;
    tracker.report_step(
        &job.task_id,
        &job.message_id,
        StepKind::MailFetch,
        StepOutcome::Success,
    )?;

    let attachment_outcome = if job.download_attachments && !fetched.attachments.is_empty() {
        StepOutcome::Success
    } else {
        StepOutcome::NotRequired
    };
    tracker.report_step(
        &job.task_id,
        &job.message_id,
        StepKind::Attachment,
        attachment_outcome,
    )?;

    match (&ctx.reviewer, job.ai_review) {
        (Some(reviewer), true) => {
            tracker.report_step(
                &job.task_id,
                &job.message_id,
                StepKind::AiReview,
                StepOutcome::Processing,
            )?;
            match reviewer.review(&fetched) {
                Ok(review) => {
                    debug!(
                        "Review of message {} scored {:.2}",
                        job.message_id, review.score
                    );
                    tracker.report_step(
                        &job.task_id,
                        &job.message_id,
                        StepKind::AiReview,
                        StepOutcome::Success,
                    )?;
                }
                Err(e) => {
                    tracker.report_step_with_error(
                        &job.task_id,
                        &job.message_id,
                        StepKind::AiReview,
                        StepOutcome::Error,
                        Some(&e.to_string()),
                    )?;
                }
            }
        }
        (None, true) => {
            warn!(
                "Task {} asks for AI review but no review backend is configured",
                job.task_id
            );
            tracker.report_step(
                &job.task_id,
                &job.message_id,
                StepKind::AiReview,
                StepOutcome::NotRequired,
            )?;
        }
        (_, false) => {
            tracker.report_step(
                &job.task_id,
                &job.message_id,
                StepKind::AiReview,
                StepOutcome::NotRequired,
            )?;
        }
    }

    read_back(ctx, job)
}

fn archive_fetched(db: &Database, fetched: &FetchedMessage) -> Result<(), TaskError> {
    let row = mail_repo::MailItemRow {
        id: fetched.mail_id.clone(),
        message_id: fetched.provisional_id.clone(),
        subject: fetched.subject.clone(),
        sent_time: fetched.sent_time.clone(),
        sender_name: fetched.sender_name.clone(),
        folder_id: fetched.folder_id.clone(),
        unread: fetched.unread,
        has_attachments: !fetched.attachments.is_empty(),
        size: fetched.size,
        processed_at: now_string(),
    };
    db.with_conn(|conn| mail_repo::insert(conn, &row))?;
    Ok(())
}

fn read_back(ctx: &ExtractionContext, job: &MessageJob) -> Result<MessageJobResult, TaskError> {
    let row = ctx.tracker.get(&job.task_id, &job.message_id)?;
    Ok(MessageJobResult {
        task_id: job.task_id.clone(),
        message_id: job.message_id.clone(),
        status: MessageStatus::parse(&row.status)?,
        error: row.error_message,
    })
}
