//! Saga Core - Document archive and semantic search engine
//!
//! This crate contains the core functionality for Saga, including:
//! - Chunked upload assembly
//! - PDF text extraction (lopdf)
//! - Text windowing for analysis and embedding
//! - In-memory embedding index with cosine top-k queries
//! - Priority job queue with retries and per-job progress streams
//! - The document processing pipeline tying it all together

pub mod analysis;
pub mod chunking;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod pdf;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod store;
pub mod upload;

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use analysis::{AnalysisProvider, HttpAnalyzer, NoopAnalyzer, WindowAnalysis};
pub use chunking::{ChunkMode, ChunkStrategy, TextWindow};
pub use config::{Config, Settings};
pub use embedding::Embedder;
pub use error::{Result, SagaError};
pub use index::{DocumentHit, EmbeddingIndex, IndexHit, WindowRef};
pub use progress::{ProgressEvent, ProgressHub, ProgressKind};
pub use queue::{
    Job, JobPayload, JobQueue, JobStatus, Priority, ProcessingOptions, QueueOptions, QueueStats,
};
pub use store::{DocumentStore, DocumentSummary, StoredDocument};
pub use upload::{ChunkAssembler, ChunkOutcome};

use pipeline::DocumentPipeline;

/// Dimension used when no embedding model is configured and we fall back to
/// the mock encoder.
const DEFAULT_DIMENSIONS: usize = 768;

/// Result of submitting one upload chunk through the archive.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChunkSubmission {
    /// More chunks are still missing.
    Pending { received: usize, expected: u32 },
    /// The upload completed and a processing job was queued.
    Queued { document_id: String, job_id: String },
}

/// One search hit joined back to its window text.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub document_id: String,
    pub document_name: String,
    pub window_index: usize,
    pub score: f32,
    pub text: String,
    /// 1-indexed page the window starts on.
    pub page: usize,
}

/// The assembled archive service: uploads in, searchable documents out.
///
/// Owns the assembler, store, index, progress hub and job queue, and wires
/// the processing pipeline into the queue's worker pool.
pub struct Archive {
    pub config: Config,
    assembler: Arc<ChunkAssembler>,
    store: Arc<DocumentStore>,
    index: Arc<EmbeddingIndex>,
    embedder: Arc<Embedder>,
    hub: Arc<ProgressHub>,
    queue: Arc<JobQueue>,
    cancel: CancellationToken,
}

impl Archive {
    /// Create an archive with explicit capability backends.
    pub fn new(config: Config, embedder: Embedder, analyzer: Arc<dyn AnalysisProvider>) -> Self {
        let assembler = Arc::new(ChunkAssembler::new(&config));
        let store = Arc::new(DocumentStore::new());
        let index = Arc::new(EmbeddingIndex::new());
        let embedder = Arc::new(embedder);
        let hub = Arc::new(ProgressHub::new());

        let pipeline = DocumentPipeline::new(
            embedder.clone(),
            analyzer,
            store.clone(),
            index.clone(),
        );
        let queue = JobQueue::new(&config, Arc::new(pipeline), hub.clone());

        let cancel = CancellationToken::new();
        upload::spawn_sweeper(assembler.clone(), cancel.child_token());

        Self {
            config,
            assembler,
            store,
            index,
            embedder,
            hub,
            queue,
            cancel,
        }
    }

    /// Create an archive from persisted settings.
    ///
    /// Without a configured embedding endpoint the mock encoder is used, so
    /// the archive still works offline. Analysis likewise falls back to a
    /// no-op backend.
    pub fn from_settings(config: Config) -> Self {
        if let Err(e) = config.ensure_dirs() {
            tracing::warn!(error = %e, "Failed to create data directory");
        }
        let settings = Settings::load(&config.settings_file);

        let embedder = match (&settings.embedding_endpoint, &settings.embedding_model_id) {
            (Some(endpoint), Some(model_id)) => Embedder::new(
                endpoint,
                model_id,
                settings.embedding_dimensions.unwrap_or(DEFAULT_DIMENSIONS),
            ),
            _ => {
                tracing::info!("No embedding endpoint configured, using mock encoder");
                Embedder::mock(settings.embedding_dimensions.unwrap_or(DEFAULT_DIMENSIONS))
            }
        };

        let analyzer: Arc<dyn AnalysisProvider> = match settings.analysis_endpoint {
            Some(ref endpoint) => Arc::new(HttpAnalyzer::new(endpoint)),
            None => Arc::new(NoopAnalyzer),
        };

        Self::new(config, embedder, analyzer)
    }

    /// Submit one chunk of an upload.
    ///
    /// When the final missing chunk arrives the payload is assembled and a
    /// processing job is queued immediately; the returned ids let the caller
    /// follow progress and later query the document.
    pub async fn submit_chunk(
        &self,
        upload_id: &str,
        original_name: &str,
        index: u32,
        total_chunks: u32,
        bytes: Bytes,
        processing: ProcessingOptions,
        queue_options: QueueOptions,
    ) -> Result<ChunkSubmission> {
        let outcome = self
            .assembler
            .submit_chunk(upload_id, original_name, index, total_chunks, bytes)
            .await?;

        match outcome {
            ChunkOutcome::Pending { received, expected } => {
                Ok(ChunkSubmission::Pending { received, expected })
            }
            ChunkOutcome::Complete(assembled) => {
                let document_id = Uuid::new_v4().to_string();
                let job_id = self.queue.enqueue(
                    JobPayload {
                        document_id: document_id.clone(),
                        file_name: assembled.original_name.clone(),
                        display_name: display_name(&assembled.original_name),
                        bytes: assembled.bytes,
                        processing,
                    },
                    queue_options,
                );
                tracing::info!(
                    upload_id,
                    document_id = %document_id,
                    job_id = %job_id,
                    "Upload assembled, processing queued"
                );
                Ok(ChunkSubmission::Queued {
                    document_id,
                    job_id,
                })
            }
        }
    }

    /// Queue a document directly, bypassing chunked upload.
    pub fn add_document(
        &self,
        file_name: &str,
        bytes: Bytes,
        processing: ProcessingOptions,
        queue_options: QueueOptions,
    ) -> (String, String) {
        let document_id = Uuid::new_v4().to_string();
        let job_id = self.queue.enqueue(
            JobPayload {
                document_id: document_id.clone(),
                file_name: file_name.to_string(),
                display_name: display_name(file_name),
                bytes,
                processing,
            },
            queue_options,
        );
        (document_id, job_id)
    }

    pub fn get_job(&self, job_id: &str) -> Result<Job> {
        self.queue.get_job(job_id)
    }

    pub fn cancel_job(&self, job_id: &str) -> Result<bool> {
        self.queue.cancel(job_id)
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Subscribe to a job's progress events. A new subscription replaces any
    /// previous one for the same job.
    pub fn subscribe_progress(&self, job_id: &str) -> ReceiverStream<ProgressEvent> {
        self.hub.subscribe(job_id)
    }

    /// Semantic search across all indexed windows.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        threshold: f32,
    ) -> anyhow::Result<Vec<SearchResult>> {
        let vector = self.embedder.embed(query).await?;
        let hits = self
            .index
            .query(&vector, &self.embedder.model_id, limit, threshold)?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(document) = self.store.get(&hit.window.document_id) else {
                // Index and store race on delete; skip orphaned hits.
                continue;
            };
            let Some(window) = document.windows.get(hit.window.window_index) else {
                continue;
            };
            results.push(SearchResult {
                document_id: document.id.clone(),
                document_name: document.name.clone(),
                window_index: hit.window.window_index,
                score: hit.score,
                text: window.text.clone(),
                page: pdf::char_offset_to_page(window.start_offset, &document.page_boundaries),
            });
        }
        Ok(results)
    }

    /// Documents most similar to the given one, by mean window vector.
    pub fn similar_documents(&self, document_id: &str, limit: usize) -> Result<Vec<DocumentHit>> {
        let model = &self.embedder.model_id;
        let Some(vector) = self.index.document_vector(document_id, model) else {
            return Ok(Vec::new());
        };
        // One extra so the document itself can be dropped from its own
        // neighbor list.
        let hits = self.index.query_documents(&vector, model, limit + 1, 0.0)?;
        Ok(hits
            .into_iter()
            .filter(|hit| hit.document_id != document_id)
            .take(limit)
            .collect())
    }

    pub fn get_document(&self, document_id: &str) -> Option<StoredDocument> {
        self.store.get(document_id)
    }

    pub fn list_documents(&self) -> Vec<DocumentSummary> {
        self.store.list()
    }

    /// Remove a document and all of its vectors. Returns false if unknown.
    pub fn delete_document(&self, document_id: &str) -> bool {
        let removed = self.store.remove(document_id);
        let vectors = self.index.remove_document(document_id);
        if removed {
            tracing::info!(document_id, vectors, "Document deleted");
        }
        removed
    }

    /// Stop background workers. In-flight jobs finish their current attempt;
    /// queued jobs are dropped with the process.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.queue.shutdown();
        tracing::info!("Archive shut down");
    }
}

impl Drop for Archive {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.queue.shutdown();
    }
}

/// Human-facing name derived from a file name: extension stripped,
/// separators turned into spaces.
fn display_name(file_name: &str) -> String {
    let stem = file_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(file_name);
    let cleaned = stem.replace(['_', '-'], " ").trim().to_string();
    if cleaned.is_empty() {
        file_name.to_string()
    } else {
        cleaned
    }
}
