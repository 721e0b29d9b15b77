//! In-memory document store.
//!
//! Holds the processed form of every document: its extracted windows, the
//! per-window analysis results, and enough metadata to render listings.
//! Search hits from the index are joined back to window text here.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analysis::WindowAnalysis;
use crate::chunking::TextWindow;

/// A fully processed document.
#[derive(Debug, Clone, Serialize)]
pub struct StoredDocument {
    pub id: String,
    pub name: String,
    pub page_count: usize,
    /// Character offset where each page ends, for mapping windows to pages.
    pub page_boundaries: Vec<usize>,
    /// blake3 of the raw uploaded bytes, hex-encoded.
    pub content_hash: String,
    pub windows: Vec<TextWindow>,
    /// Analysis keyed by window index. Sparse when analysis is disabled
    /// or failed for individual windows.
    pub analyses: HashMap<usize, WindowAnalysis>,
    pub created_at: DateTime<Utc>,
}

/// Listing row; windows and analyses are omitted.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub name: String,
    pub page_count: usize,
    pub window_count: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct DocumentStore {
    documents: RwLock<HashMap<String, StoredDocument>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document. Reprocessing a document id overwrites
    /// the previous version.
    pub fn insert(&self, document: StoredDocument) {
        let mut documents = self.documents.write().expect("store lock poisoned");
        documents.insert(document.id.clone(), document);
    }

    pub fn get(&self, document_id: &str) -> Option<StoredDocument> {
        let documents = self.documents.read().expect("store lock poisoned");
        documents.get(document_id).cloned()
    }

    /// All documents, newest first.
    pub fn list(&self) -> Vec<DocumentSummary> {
        let documents = self.documents.read().expect("store lock poisoned");
        let mut summaries: Vec<DocumentSummary> = documents
            .values()
            .map(|d| DocumentSummary {
                id: d.id.clone(),
                name: d.name.clone(),
                page_count: d.page_count,
                window_count: d.windows.len(),
                created_at: d.created_at,
            })
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    /// Remove a document. Returns false if it was never stored. The caller
    /// is responsible for dropping its vectors from the index.
    pub fn remove(&self, document_id: &str) -> bool {
        let mut documents = self.documents.write().expect("store lock poisoned");
        documents.remove(document_id).is_some()
    }

    /// Find a document with identical raw content, for duplicate detection.
    pub fn find_by_hash(&self, content_hash: &str) -> Option<String> {
        let documents = self.documents.read().expect("store lock poisoned");
        documents
            .values()
            .find(|d| d.content_hash == content_hash)
            .map(|d| d.id.clone())
    }

    pub fn len(&self) -> usize {
        self.documents.read().expect("store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(document_id: &str, index: usize, text: &str) -> TextWindow {
        TextWindow {
            document_id: document_id.to_string(),
            index,
            text: text.to_string(),
            start_offset: 0,
            end_offset: text.chars().count(),
            word_count: text.split_whitespace().count(),
        }
    }

    fn document(id: &str, name: &str) -> StoredDocument {
        StoredDocument {
            id: id.to_string(),
            name: name.to_string(),
            page_count: 1,
            page_boundaries: vec![100],
            content_hash: blake3::hash(name.as_bytes()).to_hex().to_string(),
            windows: vec![
                window(id, 0, "first window text"),
                window(id, 1, "second window text"),
            ],
            analyses: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_insert_get_remove() {
        let store = DocumentStore::new();
        store.insert(document("doc-1", "Report"));

        let stored = store.get("doc-1").unwrap();
        assert_eq!(stored.name, "Report");
        assert_eq!(stored.windows.len(), 2);

        assert!(store.remove("doc-1"));
        assert!(store.get("doc-1").is_none());
        assert!(!store.remove("doc-1"));
    }

    #[test]
    fn test_reinsert_replaces() {
        let store = DocumentStore::new();
        store.insert(document("doc-1", "Draft"));
        let mut updated = document("doc-1", "Final");
        updated.windows.push(window("doc-1", 2, "extra"));
        store.insert(updated);

        let stored = store.get("doc-1").unwrap();
        assert_eq!(stored.name, "Final");
        assert_eq!(stored.windows.len(), 3);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_find_by_hash() {
        let store = DocumentStore::new();
        store.insert(document("doc-1", "Report"));

        let hash = blake3::hash("Report".as_bytes()).to_hex().to_string();
        assert_eq!(store.find_by_hash(&hash).as_deref(), Some("doc-1"));
        assert!(store.find_by_hash("deadbeef").is_none());
    }

    #[test]
    fn test_list_newest_first() {
        let store = DocumentStore::new();
        let mut older = document("doc-1", "Older");
        older.created_at = Utc::now() - chrono::Duration::minutes(5);
        store.insert(older);
        store.insert(document("doc-2", "Newer"));

        let listed = store.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "doc-2");
        assert_eq!(listed[1].id, "doc-1");
    }
}
