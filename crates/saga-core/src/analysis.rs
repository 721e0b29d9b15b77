//! External analysis capability.
//!
//! The core treats "analyze text, get structured findings" as an opaque
//! collaborator behind a trait, the same way chat backends sit behind a
//! provider seam. Retries and timeouts around this call belong to the job
//! queue, not to the providers themselves.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Structured findings for one text window. Any field may be empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowAnalysis {
    pub themes: Vec<String>,
    pub quotes: Vec<String>,
    pub insights: Vec<String>,
    pub entities: Vec<String>,
}

/// Interface implemented by analysis backends.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Analyze one window of text.
    async fn analyze(&self, text: &str) -> Result<WindowAnalysis>;
}

/// Remote analysis backend speaking JSON over HTTP.
pub struct HttpAnalyzer {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    text: &'a str,
}

impl HttpAnalyzer {
    pub fn new(endpoint: &str) -> Self {
        tracing::info!(endpoint, "Configured remote analyzer");
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl AnalysisProvider for HttpAnalyzer {
    async fn analyze(&self, text: &str) -> Result<WindowAnalysis> {
        let analysis = self
            .client
            .post(&self.endpoint)
            .json(&AnalyzeRequest { text })
            .send()
            .await
            .context("Analysis request failed")?
            .error_for_status()
            .context("Analysis endpoint returned an error")?
            .json()
            .await
            .context("Malformed analysis response")?;
        Ok(analysis)
    }
}

/// No-op backend for tests and offline runs: every window analyzes to an
/// empty (but valid) result.
pub struct NoopAnalyzer;

#[async_trait]
impl AnalysisProvider for NoopAnalyzer {
    async fn analyze(&self, _text: &str) -> Result<WindowAnalysis> {
        Ok(WindowAnalysis::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_analyzer_returns_empty_result() {
        let analysis = NoopAnalyzer.analyze("some window text").await.unwrap();
        assert!(analysis.themes.is_empty());
        assert!(analysis.quotes.is_empty());
        assert!(analysis.insights.is_empty());
        assert!(analysis.entities.is_empty());
    }

    #[test]
    fn test_analysis_deserializes_partial_payload() {
        // Backends may omit empty fields; all of them default.
        let analysis: WindowAnalysis =
            serde_json::from_str(r#"{"themes":["land"],"quotes":[]}"#).unwrap();
        assert_eq!(analysis.themes, vec!["land".to_string()]);
        assert!(analysis.insights.is_empty());
    }
}
