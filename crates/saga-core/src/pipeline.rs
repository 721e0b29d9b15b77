//! Document processing pipeline.
//!
//! Runs as the queue's job processor: extract text, window it, analyze and
//! embed the windows, index the vectors, store the result. Each stage
//! reports progress on the job's stream.
//!
//! Failure classification matters here. Broken payloads and bad strategies
//! can never succeed, so they fail the job outright; embedding and analysis
//! go over the network and get retried by the queue.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::analysis::AnalysisProvider;
use crate::chunking;
use crate::embedding::Embedder;
use crate::index::{EmbeddingIndex, WindowRef};
use crate::pdf;
use crate::queue::{JobContext, JobOutcome, JobProcessor};
use crate::store::{DocumentStore, StoredDocument};

pub struct DocumentPipeline {
    embedder: Arc<Embedder>,
    analyzer: Arc<dyn AnalysisProvider>,
    store: Arc<DocumentStore>,
    index: Arc<EmbeddingIndex>,
}

impl DocumentPipeline {
    pub fn new(
        embedder: Arc<Embedder>,
        analyzer: Arc<dyn AnalysisProvider>,
        store: Arc<DocumentStore>,
        index: Arc<EmbeddingIndex>,
    ) -> Self {
        Self {
            embedder,
            analyzer,
            store,
            index,
        }
    }

    async fn run(&self, ctx: &JobContext) -> JobOutcome {
        let document_id = &ctx.payload.document_id;
        let strategy = &ctx.payload.processing.strategy;

        if let Err(e) = strategy.validate() {
            return JobOutcome::Fatal(e.to_string());
        }

        // Reprocessing a document id is allowed; the same bytes under a new
        // id would just duplicate an existing document, so reject that
        // before any extraction work.
        let content_hash = blake3::hash(&ctx.payload.bytes).to_hex().to_string();
        if let Some(existing) = self.store.find_by_hash(&content_hash) {
            if existing != *document_id {
                return JobOutcome::Fatal(format!(
                    "content already stored as document {existing}"
                ));
            }
        }

        ctx.report_progress(5, "extracting text");
        let extracted = match pdf::extract(&ctx.payload.bytes) {
            Ok(extracted) => extracted,
            // Undecodable payloads will never extract, whatever the attempt.
            Err(e) => return JobOutcome::Fatal(format!("{e:#}")),
        };

        let windows = match chunking::chunk(document_id, &extracted.text, strategy) {
            Ok(windows) => windows,
            Err(e) => return JobOutcome::Fatal(e.to_string()),
        };
        ctx.report_progress(20, format!("windowed into {} chunks", windows.len()));
        tracing::debug!(
            document_id = %document_id,
            windows = windows.len(),
            pages = extracted.page_count,
            "Document windowed"
        );

        let mut analyses = HashMap::new();
        if ctx.payload.processing.analyze && !windows.is_empty() {
            for (i, window) in windows.iter().enumerate() {
                match self.analyzer.analyze(&window.text).await {
                    Ok(analysis) => {
                        analyses.insert(window.index, analysis);
                    }
                    Err(e) => return JobOutcome::Retry(format!("{e:#}")),
                }
                // Analysis spans the 20..60 band of the progress bar.
                let percent = 20 + (40 * (i + 1) / windows.len()) as u8;
                ctx.report_progress(percent, format!("analyzed window {}/{}", i + 1, windows.len()));
            }
        }

        if !windows.is_empty() {
            ctx.report_progress(60, "embedding windows");
            let texts: Vec<&str> = windows.iter().map(|w| w.text.as_str()).collect();
            let vectors = match self.embedder.embed_batch(&texts).await {
                Ok(vectors) => vectors,
                Err(e) => return JobOutcome::Retry(format!("{e:#}")),
            };

            ctx.report_progress(80, "indexing vectors");
            // Reprocessing may produce fewer windows than before; clear the
            // old vectors so none go stale.
            self.index.remove_document(document_id);
            for (window, vector) in windows.iter().zip(vectors) {
                let window_ref = WindowRef {
                    document_id: document_id.clone(),
                    window_index: window.index,
                };
                if let Err(e) = self.index.index(window_ref, vector, &self.embedder.model_id) {
                    return JobOutcome::Fatal(e.to_string());
                }
            }
        }

        ctx.report_progress(95, "storing document");
        self.store.insert(StoredDocument {
            id: document_id.clone(),
            name: ctx.payload.display_name.clone(),
            page_count: extracted.page_count,
            page_boundaries: extracted.page_boundaries,
            content_hash,
            windows,
            analyses,
            created_at: Utc::now(),
        });

        tracing::info!(document_id = %document_id, "Document processed");
        JobOutcome::Success
    }
}

#[async_trait]
impl JobProcessor for DocumentPipeline {
    async fn process(&self, ctx: &JobContext) -> JobOutcome {
        self.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{NoopAnalyzer, WindowAnalysis};
    use crate::progress::ProgressHub;
    use crate::queue::{JobPayload, ProcessingOptions};
    use anyhow::anyhow;
    use bytes::Bytes;

    fn pipeline_with(analyzer: Arc<dyn AnalysisProvider>) -> DocumentPipeline {
        DocumentPipeline::new(
            Arc::new(Embedder::mock(16)),
            analyzer,
            Arc::new(DocumentStore::new()),
            Arc::new(EmbeddingIndex::new()),
        )
    }

    fn context(payload: JobPayload) -> JobContext {
        JobContext::new(
            "job-1".to_string(),
            1,
            payload,
            Arc::new(ProgressHub::new()),
        )
    }

    fn text_payload(document_id: &str, text: &str, analyze: bool) -> JobPayload {
        JobPayload {
            document_id: document_id.to_string(),
            file_name: "notes.txt".to_string(),
            display_name: "Notes".to_string(),
            bytes: Bytes::from(text.as_bytes().to_vec()),
            processing: ProcessingOptions {
                strategy: crate::chunking::ChunkStrategy::granular(),
                analyze,
            },
        }
    }

    struct BrokenAnalyzer;

    #[async_trait]
    impl AnalysisProvider for BrokenAnalyzer {
        async fn analyze(&self, _text: &str) -> anyhow::Result<WindowAnalysis> {
            Err(anyhow!("analysis backend unreachable"))
        }
    }

    #[tokio::test]
    async fn test_plain_text_document_is_stored_and_indexed() {
        let pipeline = pipeline_with(Arc::new(NoopAnalyzer));
        let text = "A sentence about land reform. Another about water rights. ".repeat(30);
        let outcome = pipeline.run(&context(text_payload("doc-1", &text, false))).await;

        assert!(matches!(outcome, JobOutcome::Success));
        let stored = pipeline.store.get("doc-1").unwrap();
        assert!(stored.windows.len() > 1);
        assert_eq!(stored.page_count, 1);
        assert_eq!(
            pipeline.index.len(&pipeline.embedder.model_id),
            stored.windows.len()
        );
    }

    #[tokio::test]
    async fn test_analysis_results_are_keyed_by_window() {
        let pipeline = pipeline_with(Arc::new(NoopAnalyzer));
        let text = "Short but real content. More of it here. ".repeat(40);
        let outcome = pipeline.run(&context(text_payload("doc-1", &text, true))).await;

        assert!(matches!(outcome, JobOutcome::Success));
        let stored = pipeline.store.get("doc-1").unwrap();
        assert_eq!(stored.analyses.len(), stored.windows.len());
        assert!(stored.analyses.contains_key(&0));
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_fatal() {
        let pipeline = pipeline_with(Arc::new(NoopAnalyzer));
        let mut payload = text_payload("doc-1", "", false);
        payload.bytes = Bytes::from_static(&[0xff, 0xfe, 0x00, 0x01]);

        let outcome = pipeline.run(&context(payload)).await;
        assert!(matches!(outcome, JobOutcome::Fatal(_)));
        assert!(pipeline.store.get("doc-1").is_none());
    }

    #[tokio::test]
    async fn test_empty_payload_completes_with_zero_windows() {
        let pipeline = pipeline_with(Arc::new(NoopAnalyzer));
        let outcome = pipeline.run(&context(text_payload("doc-1", "", false))).await;

        assert!(matches!(outcome, JobOutcome::Success));
        let stored = pipeline.store.get("doc-1").unwrap();
        assert!(stored.windows.is_empty());
        assert_eq!(pipeline.index.len(&pipeline.embedder.model_id), 0);
    }

    #[tokio::test]
    async fn test_analysis_failure_is_retryable() {
        let pipeline = pipeline_with(Arc::new(BrokenAnalyzer));
        let text = "Content that would be analyzed. ".repeat(10);
        let outcome = pipeline.run(&context(text_payload("doc-1", &text, true))).await;

        match outcome {
            JobOutcome::Retry(message) => assert!(message.contains("unreachable")),
            other => panic!("expected retry, got {other:?}"),
        }
        assert!(pipeline.store.get("doc-1").is_none());
    }

    #[tokio::test]
    async fn test_duplicate_content_under_new_id_is_rejected() {
        let pipeline = pipeline_with(Arc::new(NoopAnalyzer));
        let text = "Identical bytes uploaded twice in a row. ".repeat(10);

        let outcome = pipeline.run(&context(text_payload("doc-1", &text, false))).await;
        assert!(matches!(outcome, JobOutcome::Success));

        let outcome = pipeline.run(&context(text_payload("doc-2", &text, false))).await;
        match outcome {
            JobOutcome::Fatal(message) => assert!(message.contains("doc-1")),
            other => panic!("expected fatal, got {other:?}"),
        }
        assert!(pipeline.store.get("doc-2").is_none());

        // The original id may still reprocess its own content.
        let outcome = pipeline.run(&context(text_payload("doc-1", &text, false))).await;
        assert!(matches!(outcome, JobOutcome::Success));
    }

    #[tokio::test]
    async fn test_reprocessing_replaces_stale_vectors() {
        let pipeline = pipeline_with(Arc::new(NoopAnalyzer));
        let long = "A long document with plenty of sentences to window. ".repeat(60);
        pipeline.run(&context(text_payload("doc-1", &long, false))).await;
        let first_count = pipeline.index.len(&pipeline.embedder.model_id);

        let short = "A much shorter revision of the same document.";
        let outcome = pipeline.run(&context(text_payload("doc-1", short, false))).await;
        assert!(matches!(outcome, JobOutcome::Success));

        let after = pipeline.index.len(&pipeline.embedder.model_id);
        assert!(after < first_count);
        assert_eq!(after, pipeline.store.get("doc-1").unwrap().windows.len());
    }
}
