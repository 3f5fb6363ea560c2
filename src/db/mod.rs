//! In-memory retrieval store: a flat vector index plus the slot-aligned
//! document texts it was built from.
use std::ops::Range;

use thiserror::Error;
use tracing::error;

pub mod documents;
pub mod models;
pub mod vectors;

use documents::DocumentStore;
use models::{SearchResult, SlotId};
use vectors::VectorIndex;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("embedding dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("got {vectors} vectors for {texts} documents")]
    LengthMismatch { texts: usize, vectors: usize },

    #[error("slot {slot} out of range (store holds {len} documents)")]
    OutOfRange { slot: SlotId, len: usize },
}

/// Vector index and document store, mutated together.
///
/// `vectors.len() == documents.len()` holds between any two calls.
#[derive(Debug, Clone)]
pub struct Db {
    vectors: VectorIndex,
    documents: DocumentStore,
}

impl Db {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            vectors: VectorIndex::new(dimensions),
            documents: DocumentStore::new(),
        }
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.vectors.dimensions()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Insert documents with their embeddings; either all are committed or none.
    pub fn insert_documents(
        &mut self,
        texts: Vec<String>,
        vectors: &[Vec<f32>],
    ) -> Result<Range<SlotId>, DbError> {
        if texts.len() != vectors.len() {
            return Err(DbError::LengthMismatch {
                texts: texts.len(),
                vectors: vectors.len(),
            });
        }

        // VectorIndex::append validates the whole batch before writing and
        // DocumentStore::append cannot fail.
        let slots = self.vectors.append(vectors)?;
        self.documents.append(texts);
        Ok(slots)
    }

    /// Nearest documents to `query`, ascending by squared distance.
    ///
    /// A hit whose slot has no document is logged and skipped.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchResult>, DbError> {
        let hits = self.vectors.search(query, top_k)?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            match self.documents.get(hit.slot) {
                Ok(text) => results.push(SearchResult {
                    slot: hit.slot,
                    text: text.to_string(),
                    distance: hit.distance,
                }),
                Err(e) => error!("index/document invariant violated: {e}"),
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_insert_keeps_alignment() {
        let mut db = Db::new(2);
        let slots = db
            .insert_documents(texts(&["a", "b"]), &[vec![0.0, 0.0], vec![1.0, 1.0]])
            .unwrap();
        assert_eq!(slots, 0..2);
        assert_eq!(db.len(), 2);
        assert_eq!(db.vectors.len(), db.documents.len());
    }

    #[test]
    fn test_insert_length_mismatch_commits_nothing() {
        let mut db = Db::new(2);
        let err = db
            .insert_documents(texts(&["a", "b"]), &[vec![0.0, 0.0]])
            .unwrap_err();
        assert!(matches!(err, DbError::LengthMismatch { texts: 2, vectors: 1 }));
        assert!(db.is_empty());
        assert!(db.vectors.is_empty());
    }

    #[test]
    fn test_insert_dimension_mismatch_commits_nothing() {
        let mut db = Db::new(2);
        db.insert_documents(texts(&["a"]), &[vec![0.0, 0.0]]).unwrap();

        let err = db
            .insert_documents(texts(&["b", "c"]), &[vec![1.0, 1.0], vec![1.0]])
            .unwrap_err();
        assert!(matches!(err, DbError::DimensionMismatch { .. }));
        assert_eq!(db.len(), 1);
        assert_eq!(db.vectors.len(), 1);
    }

    #[test]
    fn test_search_joins_text() {
        let mut db = Db::new(2);
        db.insert_documents(texts(&["a", "b"]), &[vec![0.0, 0.0], vec![1.0, 1.0]])
            .unwrap();

        let results = db.search(&[0.0, 0.0], 3).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].slot, 0);
        assert_eq!(results[0].text, "a");
        assert_eq!(results[0].distance, 0.0);
        assert_eq!(results[1].text, "b");
    }

    #[test]
    fn test_search_empty() {
        let db = Db::new(3);
        assert!(db.search(&[0.0; 3], 3).unwrap().is_empty());
    }

    #[test]
    fn test_search_skips_orphan_slot() {
        let mut db = Db::new(2);
        db.insert_documents(texts(&["a"]), &[vec![0.0, 0.0]]).unwrap();
        // Break the invariant directly to exercise the degraded path.
        db.vectors.append(&[vec![0.1, 0.1]]).unwrap();

        let results = db.search(&[0.1, 0.1], 5).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].slot, 0);
    }
}
