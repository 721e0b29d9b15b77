//! External embedding capability.
//!
//! Turns window text into fixed-length vectors. The real backend is an
//! HTTP embedding endpoint (Ollama-style `/api/embed`); `mock()` swaps in a
//! deterministic local encoder so the rest of the system can be exercised
//! without a model server.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// HTTP backend configuration.
struct HttpBackend {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedding client with a fixed model and output dimension.
pub struct Embedder {
    backend: Option<HttpBackend>,
    /// Model identifier; vectors from different models are never comparable.
    pub model_id: String,
    /// Vector dimension this model produces.
    pub dimensions: usize,
}

impl Embedder {
    /// Create an embedder backed by a remote endpoint.
    pub fn new(endpoint: &str, model_id: &str, dimensions: usize) -> Self {
        tracing::info!(endpoint, model_id, dimensions, "Configured remote embedder");
        Self {
            backend: Some(HttpBackend {
                client: reqwest::Client::new(),
                endpoint: endpoint.to_string(),
            }),
            model_id: model_id.to_string(),
            dimensions,
        }
    }

    /// Create a mock embedder for testing and offline runs.
    ///
    /// Produces deterministic unit vectors derived from the text bytes, so
    /// identical texts embed identically and similarity queries behave.
    pub fn mock(dimensions: usize) -> Self {
        Self {
            backend: None,
            model_id: "mock".to_string(),
            dimensions,
        }
    }

    /// Embed a single text (used for queries).
    ///
    /// Empty text yields a zero vector rather than an error.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(vec![0.0; self.dimensions]);
        }
        Ok(self.embed_batch(&[text]).await?.remove(0))
    }

    /// Embed a batch of texts, one vector per input, in input order.
    pub async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let Some(ref backend) = self.backend else {
            return Ok(texts
                .iter()
                .map(|t| deterministic_vector(t, self.dimensions))
                .collect());
        };

        tracing::debug!(batch_size = texts.len(), model = %self.model_id, "Embedding batch");
        let start = std::time::Instant::now();

        let response: EmbedResponse = backend
            .client
            .post(&backend.endpoint)
            .json(&EmbedRequest {
                model: &self.model_id,
                input: texts,
            })
            .send()
            .await
            .context("Embedding request failed")?
            .error_for_status()
            .context("Embedding endpoint returned an error")?
            .json()
            .await
            .context("Malformed embedding response")?;

        if response.embeddings.len() != texts.len() {
            anyhow::bail!(
                "Embedding endpoint returned {} vectors for {} inputs",
                response.embeddings.len(),
                texts.len()
            );
        }
        for vector in &response.embeddings {
            if vector.len() != self.dimensions {
                anyhow::bail!(
                    "Model '{}' returned a {}-dimensional vector, expected {}",
                    self.model_id,
                    vector.len(),
                    self.dimensions
                );
            }
        }

        tracing::debug!(
            batch_size = texts.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "Batch embedding complete"
        );

        Ok(response.embeddings)
    }
}

/// Hash text bytes into vector slots and normalize. Deterministic, so the
/// mock embedder gives stable, distinguishable vectors per input.
fn deterministic_vector(text: &str, dimensions: usize) -> Vec<f32> {
    let mut vector = vec![0.0_f32; dimensions];
    if text.is_empty() || dimensions == 0 {
        return vector;
    }

    for (idx, byte) in text.bytes().enumerate() {
        vector[idx % dimensions] += f32::from(byte) / 255.0;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}
