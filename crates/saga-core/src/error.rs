//! Error taxonomy for the core subsystems.
//!
//! Synchronous surfaces (chunk submission, chunking, index queries) return
//! these directly. Failures inside job processing are captured by the queue,
//! recorded on the job, and surfaced via `get_job` and the progress stream.

use thiserror::Error;

/// Errors returned by the core subsystems.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Chunk metadata is malformed or inconsistent with the session.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A single chunk exceeded the configured per-chunk cap.
    #[error("chunk of {actual} bytes exceeds the {limit} byte cap")]
    ChunkTooLarge { actual: usize, limit: usize },

    /// The running upload total exceeded the configured maximum file size.
    /// The session and all stored chunks are discarded.
    #[error("upload exceeds the {limit} byte maximum")]
    Oversize { limit: usize },

    /// Chunks arrived for a session that was purged after idle timeout.
    #[error("unknown or expired upload: {0}")]
    UploadNotFound(String),

    /// The chunking strategy is not usable.
    #[error("invalid chunking strategy: {0}")]
    InvalidStrategy(String),

    /// A query or insert vector disagrees with the model's fixed dimension.
    #[error("dimension mismatch for model '{model}': expected {expected}, got {actual}")]
    DimensionMismatch {
        model: String,
        expected: usize,
        actual: usize,
    },

    /// No job with the given id.
    #[error("no such job: {0}")]
    JobNotFound(String),

    /// A job failed on every permitted attempt.
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

pub type Result<T> = std::result::Result<T, SagaError>;
