//! Job types and data structures for the processing queue.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chunking::ChunkStrategy;

/// Dispatch priority. Order matters: later variants outrank earlier ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Job lifecycle state. Transitions only move forward:
/// queued -> active -> completed, or active -> failed, with failed -> queued
/// permitted while retry attempts remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Active,
    Completed,
    Failed,
}

/// Caller-facing queueing knobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueOptions {
    pub priority: Priority,
    /// Retries permitted after the first attempt; a job is attempted at
    /// most `max_retries + 1` times. `None` uses the queue's configured
    /// default budget.
    pub max_retries: Option<u32>,
}

/// How the pipeline should treat a document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingOptions {
    pub strategy: ChunkStrategy,
    /// Skip the (possibly slow) analysis capability when false.
    pub analyze: bool,
}

impl ProcessingOptions {
    pub fn granular() -> Self {
        Self {
            strategy: ChunkStrategy::granular(),
            analyze: true,
        }
    }

    pub fn standard() -> Self {
        Self {
            strategy: ChunkStrategy::standard(),
            analyze: true,
        }
    }
}

/// The work a job carries. Bytes are reference-counted, so cloning a payload
/// through the queue is cheap.
#[derive(Debug, Clone)]
pub struct JobPayload {
    /// Document id assigned at submission; the pipeline stores results
    /// under it.
    pub document_id: String,
    pub file_name: String,
    pub display_name: String,
    pub bytes: Bytes,
    pub processing: ProcessingOptions,
}

/// Point-in-time snapshot of a job. Status transitions are owned exclusively
/// by the queue; callers only ever see copies.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub document_id: String,
    pub file_name: String,
    pub display_name: String,
    pub priority: Priority,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Heuristic from payload size, surfaced for UX only.
    pub estimated_duration_ms: u64,
    pub last_error: Option<String>,
}

/// Queue-wide counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Explicit result of one processing attempt, inspected by the worker loop.
/// Keeping retry policy data-driven instead of unwinding through errors.
#[derive(Debug)]
pub enum JobOutcome {
    Success,
    /// Transient failure; re-queue at the original priority while attempts
    /// remain.
    Retry(String),
    /// The job can never succeed; fail without consuming remaining attempts.
    Fatal(String),
}
