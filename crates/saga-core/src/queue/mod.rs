//! Background job queue.
//!
//! Heavyweight document-processing work enters here and is pulled by a
//! bounded pool of workers. Dispatch is priority-then-FIFO: the highest
//! priority queued job wins, and within a priority the earliest enqueued
//! wins. Failed attempts re-enter the queue at their original priority and
//! position until the retry budget runs out. Enqueue never blocks; callers
//! get a job id immediately and follow along via snapshots and the progress
//! stream.
//!
//! The queue is in-memory: jobs do not survive a process restart. That
//! limitation is deliberate (see DESIGN.md).

mod types;

pub use types::{
    Job, JobOutcome, JobPayload, JobStatus, Priority, ProcessingOptions, QueueOptions, QueueStats,
};

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Result, SagaError};
use crate::progress::{ProgressEvent, ProgressHub, ProgressKind};

/// Flat cost assumed per job before size is considered.
const ESTIMATE_BASE_MS: u64 = 250;
/// Rough processing throughput used for the duration estimate.
const ESTIMATE_BYTES_PER_MS: u64 = 50_000;

/// Everything a processing attempt gets to see.
pub struct JobContext {
    pub job_id: String,
    /// 1-based attempt number.
    pub attempt: u32,
    pub payload: JobPayload,
    hub: Arc<ProgressHub>,
}

impl JobContext {
    pub(crate) fn new(
        job_id: String,
        attempt: u32,
        payload: JobPayload,
        hub: Arc<ProgressHub>,
    ) -> Self {
        Self {
            job_id,
            attempt,
            payload,
            hub,
        }
    }

    /// Push a percent-complete event to the job's progress stream.
    pub fn report_progress(&self, percent: u8, message: impl Into<String>) {
        self.hub.emit(
            &self.job_id,
            ProgressEvent::new(ProgressKind::Progress, message, Some(percent)),
        );
    }
}

/// The work a worker runs per attempt. Outcomes drive the retry policy.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, ctx: &JobContext) -> JobOutcome;
}

/// Internal job record. Only the queue mutates it.
struct JobRecord {
    job: Job,
    payload: JobPayload,
    /// FIFO position within a priority class, fixed at enqueue so retries
    /// keep their place.
    seq: u64,
    /// Set by `cancel` on an active job; blocks any further retry.
    cancel_requested: bool,
}

/// Heap entry; max-heap on (priority, earliest seq).
#[derive(PartialEq, Eq)]
struct PendingEntry {
    priority: Priority,
    seq: u64,
    job_id: String,
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct QueueState {
    pending: BinaryHeap<PendingEntry>,
    records: HashMap<String, JobRecord>,
    next_seq: u64,
}

/// Priority job queue with a bounded worker pool.
pub struct JobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    hub: Arc<ProgressHub>,
    processor: Arc<dyn JobProcessor>,
    /// Retry budget for jobs whose options leave it unset.
    default_max_retries: u32,
    cancel: CancellationToken,
}

impl JobQueue {
    /// Create the queue and spawn its worker pool.
    pub fn new(
        config: &Config,
        processor: Arc<dyn JobProcessor>,
        hub: Arc<ProgressHub>,
    ) -> Arc<Self> {
        let queue = Arc::new(Self {
            state: Mutex::new(QueueState {
                pending: BinaryHeap::new(),
                records: HashMap::new(),
                next_seq: 0,
            }),
            notify: Notify::new(),
            hub,
            processor,
            default_max_retries: config.default_max_retries,
            cancel: CancellationToken::new(),
        });

        for worker in 0..config.worker_count.max(1) {
            let queue = queue.clone();
            tokio::spawn(async move {
                tracing::debug!(worker, "Job worker started");
                queue.run_worker().await;
                tracing::debug!(worker, "Job worker stopped");
            });
        }

        tracing::info!(workers = config.worker_count.max(1), "Job queue started");
        queue
    }

    /// Add a job. Returns immediately with the new job id; the job waits if
    /// all workers are busy.
    pub fn enqueue(&self, payload: JobPayload, options: QueueOptions) -> String {
        let job_id = Uuid::new_v4().to_string();
        let estimated_duration_ms =
            ESTIMATE_BASE_MS + payload.bytes.len() as u64 / ESTIMATE_BYTES_PER_MS;
        let max_retries = options.max_retries.unwrap_or(self.default_max_retries);

        let job = Job {
            id: job_id.clone(),
            document_id: payload.document_id.clone(),
            file_name: payload.file_name.clone(),
            display_name: payload.display_name.clone(),
            priority: options.priority,
            status: JobStatus::Queued,
            attempts: 0,
            max_retries,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            estimated_duration_ms,
            last_error: None,
        };

        {
            let mut state = self.state.lock().expect("queue lock poisoned");
            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.push(PendingEntry {
                priority: options.priority,
                seq,
                job_id: job_id.clone(),
            });
            state.records.insert(
                job_id.clone(),
                JobRecord {
                    job,
                    payload,
                    seq,
                    cancel_requested: false,
                },
            );
        }

        self.hub.emit(
            &job_id,
            ProgressEvent::new(ProgressKind::Queued, "queued for processing", None),
        );
        tracing::debug!(job_id = %job_id, priority = ?options.priority, "Job enqueued");
        self.notify.notify_one();
        job_id
    }

    /// Snapshot of a job's current state.
    pub fn get_job(&self, job_id: &str) -> Result<Job> {
        let state = self.state.lock().expect("queue lock poisoned");
        state
            .records
            .get(job_id)
            .map(|r| r.job.clone())
            .ok_or_else(|| SagaError::JobNotFound(job_id.to_string()))
    }

    /// Cancel a job.
    ///
    /// Returns true only if the job was still queued. Cancelling an active
    /// job cannot stop in-flight work, but it blocks any further retry.
    pub fn cancel(&self, job_id: &str) -> Result<bool> {
        let cancelled_while_queued = {
            let mut state = self.state.lock().expect("queue lock poisoned");
            let record = state
                .records
                .get_mut(job_id)
                .ok_or_else(|| SagaError::JobNotFound(job_id.to_string()))?;

            record.cancel_requested = true;
            if record.job.status == JobStatus::Queued {
                record.job.status = JobStatus::Failed;
                record.job.last_error = Some("cancelled before start".to_string());
                record.job.finished_at = Some(Utc::now());
                true
            } else {
                false
            }
        };

        if cancelled_while_queued {
            self.hub.emit(
                job_id,
                ProgressEvent::new(ProgressKind::Failed, "cancelled before start", None),
            );
            self.hub.close(job_id);
            tracing::info!(job_id, "Job cancelled");
        }
        Ok(cancelled_while_queued)
    }

    /// Queue-wide counters.
    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock().expect("queue lock poisoned");
        let mut stats = QueueStats::default();
        for record in state.records.values() {
            match record.job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Active => stats.active += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Stop the worker pool. Queued jobs stay queued and are lost with the
    /// process.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn run_worker(&self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.take_next() {
                Some(ctx) => self.run_attempt(ctx).await,
                None => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = self.notify.notified() => {}
                    }
                }
            }
        }
    }

    /// Pop the highest-priority queued job and mark it active.
    fn take_next(&self) -> Option<JobContext> {
        let mut state = self.state.lock().expect("queue lock poisoned");
        while let Some(entry) = state.pending.pop() {
            let Some(record) = state.records.get_mut(&entry.job_id) else {
                continue;
            };
            // Stale entries (cancelled while queued) fall through here.
            if record.job.status != JobStatus::Queued || record.cancel_requested {
                continue;
            }

            record.job.status = JobStatus::Active;
            record.job.attempts += 1;
            if record.job.started_at.is_none() {
                record.job.started_at = Some(Utc::now());
            }
            return Some(JobContext::new(
                entry.job_id,
                record.job.attempts,
                record.payload.clone(),
                self.hub.clone(),
            ));
        }
        None
    }

    async fn run_attempt(&self, ctx: JobContext) {
        self.hub.emit(
            &ctx.job_id,
            ProgressEvent::new(
                ProgressKind::Started,
                format!("processing started (attempt {})", ctx.attempt),
                None,
            ),
        );
        tracing::debug!(job_id = %ctx.job_id, attempt = ctx.attempt, "Processing job");

        let outcome = self.processor.process(&ctx).await;

        match outcome {
            JobOutcome::Success => self.finish_success(&ctx.job_id),
            JobOutcome::Retry(error) => self.finish_failed_attempt(&ctx.job_id, error, false),
            JobOutcome::Fatal(error) => self.finish_failed_attempt(&ctx.job_id, error, true),
        }
    }

    fn finish_success(&self, job_id: &str) {
        {
            let mut state = self.state.lock().expect("queue lock poisoned");
            if let Some(record) = state.records.get_mut(job_id) {
                record.job.status = JobStatus::Completed;
                record.job.finished_at = Some(Utc::now());
            }
        }
        self.hub.emit(
            job_id,
            ProgressEvent::new(ProgressKind::Completed, "processing complete", Some(100)),
        );
        self.hub.close(job_id);
        tracing::info!(job_id, "Job completed");
    }

    fn finish_failed_attempt(&self, job_id: &str, error: String, fatal: bool) {
        enum Next {
            Requeue,
            Fail(String),
        }

        let next = {
            let mut state = self.state.lock().expect("queue lock poisoned");
            let Some(record) = state.records.get_mut(job_id) else {
                return;
            };

            record.job.last_error = Some(error.clone());
            let retryable =
                !fatal && !record.cancel_requested && record.job.attempts <= record.job.max_retries;

            if retryable {
                record.job.status = JobStatus::Queued;
                let entry = PendingEntry {
                    priority: record.job.priority,
                    seq: record.seq,
                    job_id: job_id.to_string(),
                };
                state.pending.push(entry);
                Next::Requeue
            } else {
                record.job.status = JobStatus::Failed;
                record.job.finished_at = Some(Utc::now());
                let final_error = if fatal || record.cancel_requested {
                    error.clone()
                } else {
                    let exhausted = SagaError::RetriesExhausted {
                        attempts: record.job.attempts,
                        last_error: error.clone(),
                    };
                    let message = exhausted.to_string();
                    record.job.last_error = Some(message.clone());
                    message
                };
                Next::Fail(final_error)
            }
        };

        match next {
            Next::Requeue => {
                tracing::warn!(job_id, error = %error, "Attempt failed, re-queued");
                self.hub.emit(
                    job_id,
                    ProgressEvent::new(ProgressKind::Queued, "re-queued after failure", None),
                );
                self.notify.notify_one();
            }
            Next::Fail(message) => {
                tracing::error!(job_id, error = %message, "Job failed");
                self.hub
                    .emit(job_id, ProgressEvent::new(ProgressKind::Failed, message, None));
                self.hub.close(job_id);
            }
        }
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
