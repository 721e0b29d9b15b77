//! Chunked-upload assembly.
//!
//! Clients push files larger than a single request allows as numbered byte
//! ranges. Each upload id owns one session; chunk writes serialize on that
//! session's lock while different uploads proceed in parallel. Assembly
//! happens exactly once, on the call that supplies the last missing index,
//! concatenating chunks by index regardless of arrival order.
//!
//! Sessions idle past the timeout are purged by a background sweeper; purged
//! ids are remembered for a retention window so a client trying to resume a
//! dead upload gets `UploadNotFound` instead of silently starting over.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Result, SagaError};

/// One in-progress chunked upload.
struct UploadSession {
    original_name: String,
    total_chunks: u32,
    /// Received chunk bytes keyed by index. Duplicates overwrite.
    chunks: HashMap<u32, Bytes>,
    /// Running byte total across stored chunks.
    total_bytes: usize,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
    last_activity: Instant,
    /// Set by the completing call; concurrent late submitters see the
    /// session as gone.
    finished: bool,
}

/// Result of a chunk submission.
#[derive(Debug)]
pub enum ChunkOutcome {
    /// More chunks are still missing.
    Pending { received: usize, expected: u32 },
    /// This call supplied the last missing index; the upload is assembled.
    Complete(AssembledUpload),
}

/// A fully reassembled upload.
#[derive(Debug, Clone)]
pub struct AssembledUpload {
    pub original_name: String,
    pub bytes: Bytes,
}

/// Receives numbered byte ranges and reassembles them per upload id.
pub struct ChunkAssembler {
    sessions: RwLock<HashMap<String, Arc<Mutex<UploadSession>>>>,
    /// Recently purged or finished upload ids with their removal time.
    tombstones: std::sync::Mutex<HashMap<String, Instant>>,
    max_chunk_bytes: usize,
    max_upload_bytes: usize,
    idle_timeout: std::time::Duration,
    tombstone_retention: std::time::Duration,
    sweep_interval: std::time::Duration,
}

impl ChunkAssembler {
    pub fn new(config: &Config) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            tombstones: std::sync::Mutex::new(HashMap::new()),
            max_chunk_bytes: config.max_chunk_bytes,
            max_upload_bytes: config.max_upload_bytes,
            idle_timeout: config.upload_idle_timeout,
            tombstone_retention: config.upload_tombstone_retention,
            sweep_interval: config.upload_sweep_interval,
        }
    }

    /// Submit one chunk of an upload.
    ///
    /// The first chunk for an unknown id opens a session (chunks may arrive
    /// in any order, so the opener can carry any index). `total_chunks` is
    /// fixed for the session's life; resubmitting an index overwrites its
    /// bytes so client retries are harmless.
    pub async fn submit_chunk(
        &self,
        upload_id: &str,
        original_name: &str,
        index: u32,
        total_chunks: u32,
        bytes: Bytes,
    ) -> Result<ChunkOutcome> {
        if total_chunks == 0 {
            return Err(SagaError::ProtocolViolation(
                "total_chunks must be at least 1".into(),
            ));
        }
        if index >= total_chunks {
            return Err(SagaError::ProtocolViolation(format!(
                "chunk index {index} out of range for {total_chunks} chunks"
            )));
        }
        if bytes.len() > self.max_chunk_bytes {
            return Err(SagaError::ChunkTooLarge {
                actual: bytes.len(),
                limit: self.max_chunk_bytes,
            });
        }

        let session = self.get_or_create(upload_id, original_name, total_chunks).await?;
        let mut session = session.lock().await;

        if session.finished {
            return Err(SagaError::UploadNotFound(upload_id.to_string()));
        }
        if session.total_chunks != total_chunks {
            return Err(SagaError::ProtocolViolation(format!(
                "total_chunks changed from {} to {} for upload {}",
                session.total_chunks, total_chunks, upload_id
            )));
        }

        if let Some(previous) = session.chunks.insert(index, bytes.clone()) {
            session.total_bytes -= previous.len();
            tracing::debug!(upload_id, index, "Overwrote resubmitted chunk");
        }
        session.total_bytes += bytes.len();
        session.last_activity = Instant::now();

        if session.total_bytes > self.max_upload_bytes {
            drop(session);
            self.discard(upload_id).await;
            return Err(SagaError::Oversize {
                limit: self.max_upload_bytes,
            });
        }

        if session.chunks.len() < session.total_chunks as usize {
            return Ok(ChunkOutcome::Pending {
                received: session.chunks.len(),
                expected: session.total_chunks,
            });
        }

        // Last missing index just arrived: assemble by index order.
        session.finished = true;
        let mut assembled = BytesMut::with_capacity(session.total_bytes);
        for i in 0..session.total_chunks {
            // Every index is present; completeness was just checked.
            assembled.extend_from_slice(&session.chunks[&i]);
        }
        let upload = AssembledUpload {
            original_name: session.original_name.clone(),
            bytes: assembled.freeze(),
        };
        drop(session);
        self.discard(upload_id).await;

        tracing::info!(
            upload_id,
            name = %upload.original_name,
            size = upload.bytes.len(),
            "Upload assembled"
        );
        Ok(ChunkOutcome::Complete(upload))
    }

    async fn get_or_create(
        &self,
        upload_id: &str,
        original_name: &str,
        total_chunks: u32,
    ) -> Result<Arc<Mutex<UploadSession>>> {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(upload_id) {
                return Ok(session.clone());
            }
        }

        if self.is_tombstoned(upload_id) {
            return Err(SagaError::UploadNotFound(upload_id.to_string()));
        }

        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(upload_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(upload_id, total_chunks, "Opened upload session");
                Arc::new(Mutex::new(UploadSession {
                    original_name: original_name.to_string(),
                    total_chunks,
                    chunks: HashMap::new(),
                    total_bytes: 0,
                    created_at: Utc::now(),
                    last_activity: Instant::now(),
                    finished: false,
                }))
            })
            .clone();
        Ok(session)
    }

    fn is_tombstoned(&self, upload_id: &str) -> bool {
        self.tombstones
            .lock()
            .expect("tombstone lock poisoned")
            .contains_key(upload_id)
    }

    /// Remove a session and remember its id.
    async fn discard(&self, upload_id: &str) {
        self.sessions.write().await.remove(upload_id);
        self.tombstones
            .lock()
            .expect("tombstone lock poisoned")
            .insert(upload_id.to_string(), Instant::now());
    }

    /// Purge sessions idle past the timeout and expire old tombstones.
    /// Partial bytes are discarded silently.
    pub async fn purge_idle(&self) -> usize {
        let now = Instant::now();
        let mut expired = Vec::new();

        {
            let sessions = self.sessions.read().await;
            for (id, session) in sessions.iter() {
                if let Ok(session) = session.try_lock() {
                    if now.duration_since(session.last_activity) > self.idle_timeout {
                        expired.push(id.clone());
                    }
                }
            }
        }

        for id in &expired {
            tracing::info!(upload_id = %id, "Purged idle upload session");
            self.discard(id).await;
        }

        let retention = self.tombstone_retention;
        self.tombstones
            .lock()
            .expect("tombstone lock poisoned")
            .retain(|_, purged_at| now.duration_since(*purged_at) <= retention);

        expired.len()
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// Spawn the background sweeper that purges idle sessions until cancelled.
pub fn spawn_sweeper(assembler: Arc<ChunkAssembler>, cancel: CancellationToken) {
    let interval = assembler.sweep_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::debug!("Upload sweeper cancelled");
                    break;
                }

                _ = ticker.tick() => {
                    assembler.purge_idle().await;
                }
            }
        }
    });
}
