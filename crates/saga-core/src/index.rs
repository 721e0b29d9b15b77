//! In-memory vector index for semantic retrieval.
//!
//! Vectors live in per-model spaces; the first insert for a model fixes the
//! dimension every later insert and query must match. Queries are exhaustive
//! cosine-similarity scans - fine for the corpus sizes this serves, and reads
//! may trail writes slightly, which is acceptable.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};

/// Reference to an indexed text window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowRef {
    pub document_id: String,
    pub window_index: usize,
}

/// A query match.
#[derive(Debug, Clone, Serialize)]
pub struct IndexHit {
    pub window: WindowRef,
    pub score: f32,
}

/// A document-level query match.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentHit {
    pub document_id: String,
    pub score: f32,
}

struct Entry {
    window: WindowRef,
    vector: Vec<f32>,
}

/// All vectors stored for one embedding model.
struct ModelSpace {
    dimension: usize,
    /// Insertion-ordered; re-indexing a window replaces its vector in place,
    /// so tie-breaks keep favoring the earlier position.
    entries: Vec<Entry>,
    by_window: HashMap<WindowRef, usize>,
}

/// Append/replace-only vector store answering top-k similarity queries.
#[derive(Default)]
pub struct EmbeddingIndex {
    spaces: RwLock<HashMap<String, ModelSpace>>,
}

/// Cosine similarity; a zero vector on either side scores 0 instead of
/// dividing by zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl EmbeddingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a vector for a window under the given model.
    ///
    /// Re-indexing the same window replaces its prior vector for that model.
    pub fn index(&self, window: WindowRef, vector: Vec<f32>, model: &str) -> Result<()> {
        let mut spaces = self.spaces.write().expect("index lock poisoned");

        let space = spaces.entry(model.to_string()).or_insert_with(|| ModelSpace {
            dimension: vector.len(),
            entries: Vec::new(),
            by_window: HashMap::new(),
        });

        if vector.len() != space.dimension {
            return Err(SagaError::DimensionMismatch {
                model: model.to_string(),
                expected: space.dimension,
                actual: vector.len(),
            });
        }

        match space.by_window.get(&window) {
            Some(&pos) => space.entries[pos].vector = vector,
            None => {
                space.by_window.insert(window.clone(), space.entries.len());
                space.entries.push(Entry { window, vector });
            }
        }
        Ok(())
    }

    /// Top-k windows by cosine similarity with `score > threshold`.
    ///
    /// Ties are broken by insertion order (earlier-indexed wins). Querying
    /// an unknown model or an empty index returns an empty vec.
    pub fn query(
        &self,
        vector: &[f32],
        model: &str,
        k: usize,
        threshold: f32,
    ) -> Result<Vec<IndexHit>> {
        let spaces = self.spaces.read().expect("index lock poisoned");
        let Some(space) = spaces.get(model) else {
            return Ok(Vec::new());
        };

        if vector.len() != space.dimension {
            return Err(SagaError::DimensionMismatch {
                model: model.to_string(),
                expected: space.dimension,
                actual: vector.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = space
            .entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| (pos, cosine_similarity(vector, &entry.vector)))
            .filter(|(_, score)| *score > threshold)
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(pos, score)| IndexHit {
                window: space.entries[pos].window.clone(),
                score,
            })
            .collect())
    }

    /// Component-wise mean of all window vectors a document has stored for
    /// the given model. None if the document has no vectors there.
    pub fn document_vector(&self, document_id: &str, model: &str) -> Option<Vec<f32>> {
        let spaces = self.spaces.read().expect("index lock poisoned");
        let space = spaces.get(model)?;

        let mut sum = vec![0.0_f32; space.dimension];
        let mut count = 0usize;
        for entry in &space.entries {
            if entry.window.document_id == document_id {
                for (s, v) in sum.iter_mut().zip(&entry.vector) {
                    *s += v;
                }
                count += 1;
            }
        }
        if count == 0 {
            return None;
        }
        for s in &mut sum {
            *s /= count as f32;
        }
        Some(sum)
    }

    /// Top-k documents by cosine similarity of their averaged window
    /// vectors, same threshold and tie-break rules as `query`.
    pub fn query_documents(
        &self,
        vector: &[f32],
        model: &str,
        k: usize,
        threshold: f32,
    ) -> Result<Vec<DocumentHit>> {
        let spaces = self.spaces.read().expect("index lock poisoned");
        let Some(space) = spaces.get(model) else {
            return Ok(Vec::new());
        };

        if vector.len() != space.dimension {
            return Err(SagaError::DimensionMismatch {
                model: model.to_string(),
                expected: space.dimension,
                actual: vector.len(),
            });
        }

        // Averaged vector per document, ordered by first appearance.
        let mut order: Vec<String> = Vec::new();
        let mut sums: HashMap<&str, (Vec<f32>, usize)> = HashMap::new();
        for entry in &space.entries {
            let doc_id = entry.window.document_id.as_str();
            let (sum, count) = sums.entry(doc_id).or_insert_with(|| {
                order.push(doc_id.to_string());
                (vec![0.0; space.dimension], 0)
            });
            for (s, v) in sum.iter_mut().zip(&entry.vector) {
                *s += v;
            }
            *count += 1;
        }

        let mut scored: Vec<(usize, String, f32)> = order
            .into_iter()
            .enumerate()
            .map(|(pos, doc_id)| {
                let (sum, count) = &sums[doc_id.as_str()];
                let mean: Vec<f32> = sum.iter().map(|s| s / *count as f32).collect();
                let score = cosine_similarity(vector, &mean);
                (pos, doc_id, score)
            })
            .filter(|(_, _, score)| *score > threshold)
            .collect();

        scored.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(_, document_id, score)| DocumentHit { document_id, score })
            .collect())
    }

    /// Delete every vector belonging to a document, across all models.
    /// Returns the number of vectors removed.
    pub fn remove_document(&self, document_id: &str) -> usize {
        let mut spaces = self.spaces.write().expect("index lock poisoned");
        let mut removed = 0;

        for space in spaces.values_mut() {
            let before = space.entries.len();
            space.entries.retain(|e| e.window.document_id != document_id);
            removed += before - space.entries.len();

            space.by_window.clear();
            for (pos, entry) in space.entries.iter().enumerate() {
                space.by_window.insert(entry.window.clone(), pos);
            }
        }

        if removed > 0 {
            tracing::debug!(document_id, removed, "Removed document vectors");
        }
        removed
    }

    /// Number of vectors stored for a model.
    pub fn len(&self, model: &str) -> usize {
        self.spaces
            .read()
            .expect("index lock poisoned")
            .get(model)
            .map_or(0, |s| s.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wref(doc: &str, idx: usize) -> WindowRef {
        WindowRef {
            document_id: doc.to_string(),
            window_index: idx,
        }
    }

    fn seeded_index() -> EmbeddingIndex {
        let index = EmbeddingIndex::new();
        index.index(wref("a", 0), vec![1.0, 0.0, 0.0], "m").unwrap();
        index.index(wref("a", 1), vec![0.9, 0.1, 0.0], "m").unwrap();
        index.index(wref("b", 0), vec![0.0, 1.0, 0.0], "m").unwrap();
        index.index(wref("b", 1), vec![0.0, 0.0, 1.0], "m").unwrap();
        index
    }

    #[test]
    fn test_query_orders_by_score_descending() {
        let index = seeded_index();
        let hits = index.query(&[1.0, 0.0, 0.0], "m", 10, 0.0).unwrap();

        assert_eq!(hits[0].window, wref("a", 0));
        assert_eq!(hits[1].window, wref("a", 1));
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_raising_threshold_never_grows_results() {
        let index = seeded_index();
        let query = [0.7, 0.7, 0.1];

        let mut prev_len = usize::MAX;
        for threshold in [-1.0, 0.0, 0.3, 0.6, 0.9] {
            let hits = index.query(&query, "m", 10, threshold).unwrap();
            assert!(hits.len() <= prev_len);
            prev_len = hits.len();
        }
    }

    #[test]
    fn test_top_k_is_prefix_of_full_ranking() {
        let index = seeded_index();
        let full = index.query(&[0.5, 0.5, 0.5], "m", 10, -1.0).unwrap();

        for k in 0..full.len() {
            let top = index.query(&[0.5, 0.5, 0.5], "m", k, -1.0).unwrap();
            assert_eq!(top.len(), k);
            for (a, b) in top.iter().zip(&full) {
                assert_eq!(a.window, b.window);
            }
        }
    }

    #[test]
    fn test_ties_broken_by_insertion_order() {
        let index = EmbeddingIndex::new();
        index.index(wref("late", 0), vec![0.0, 1.0], "m").unwrap();
        index.index(wref("first", 0), vec![1.0, 0.0], "m").unwrap();
        index.index(wref("second", 0), vec![1.0, 0.0], "m").unwrap();

        let hits = index.query(&[1.0, 0.0], "m", 2, -1.0).unwrap();
        assert_eq!(hits[0].window.document_id, "first");
        assert_eq!(hits[1].window.document_id, "second");
    }

    #[test]
    fn test_reindex_replaces_and_keeps_position() {
        let index = EmbeddingIndex::new();
        index.index(wref("a", 0), vec![1.0, 0.0], "m").unwrap();
        index.index(wref("b", 0), vec![1.0, 0.0], "m").unwrap();
        // Replace a's vector; it should keep its earlier tie-break slot.
        index.index(wref("a", 0), vec![1.0, 0.0], "m").unwrap();

        assert_eq!(index.len("m"), 2);
        let hits = index.query(&[1.0, 0.0], "m", 2, -1.0).unwrap();
        assert_eq!(hits[0].window.document_id, "a");
    }

    #[test]
    fn test_zero_vector_scores_zero() {
        let index = EmbeddingIndex::new();
        index.index(wref("a", 0), vec![0.0, 0.0], "m").unwrap();
        let hits = index.query(&[1.0, 0.0], "m", 10, -1.0).unwrap();
        assert_eq!(hits[0].score, 0.0);

        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let index = EmbeddingIndex::new();
        index.index(wref("a", 0), vec![1.0, 0.0, 0.0], "m").unwrap();

        let err = index.index(wref("a", 1), vec![1.0, 0.0], "m").unwrap_err();
        assert!(matches!(err, SagaError::DimensionMismatch { .. }));

        let err = index.query(&[1.0, 0.0], "m", 5, 0.0).unwrap_err();
        assert!(matches!(err, SagaError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_empty_index_returns_empty() {
        let index = EmbeddingIndex::new();
        assert!(index.query(&[1.0, 0.0], "unknown", 5, 0.0).unwrap().is_empty());
    }

    #[test]
    fn test_document_vector_is_componentwise_mean() {
        let index = seeded_index();
        let mean = index.document_vector("a", "m").unwrap();
        assert!((mean[0] - 0.95).abs() < 1e-6);
        assert!((mean[1] - 0.05).abs() < 1e-6);

        assert!(index.document_vector("missing", "m").is_none());
    }

    #[test]
    fn test_query_documents_uses_averaged_vectors() {
        let index = seeded_index();
        let hits = index.query_documents(&[1.0, 0.0, 0.0], "m", 10, 0.0).unwrap();

        assert_eq!(hits[0].document_id, "a");
        let err = index
            .query_documents(&[1.0, 0.0], "m", 10, 0.0)
            .unwrap_err();
        assert!(matches!(err, SagaError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_remove_document_cascades() {
        let index = seeded_index();
        assert_eq!(index.remove_document("a"), 2);
        assert_eq!(index.len("m"), 2);

        let hits = index.query(&[1.0, 0.0, 0.0], "m", 10, -1.0).unwrap();
        assert!(hits.iter().all(|h| h.window.document_id != "a"));
    }
}
