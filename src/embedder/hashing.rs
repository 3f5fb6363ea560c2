//! Offline embedder based on character feature hashing.
//!
//! Every non-whitespace character is hashed into one of `dimensions` buckets
//! and the bucket counts are L2-normalized, so texts sharing characters land
//! close together. Deterministic, needs no network.
use std::hash::{DefaultHasher, Hash, Hasher};

use async_trait::async_trait;

use super::{Embedder, EmbedderError};

pub struct HashingEmbedder {
    pub dimensions: usize,
}

impl HashingEmbedder {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// Embed synchronously; the async trait methods delegate here.
    #[must_use]
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];
        if self.dimensions == 0 {
            return embedding;
        }

        for c in text.chars().filter(|c| !c.is_whitespace()) {
            let mut hasher = DefaultHasher::new();
            c.hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimensions as u64) as usize;
            embedding[bucket] += 1.0;
        }

        // L2 normalize
        let norm_sq: f32 = embedding.iter().map(|v| v * v).sum();
        if norm_sq > 0.0 {
            let inv = 1.0 / norm_sq.sqrt();
            for v in &mut embedding {
                *v *= inv;
            }
        }

        embedding
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self { dimensions: 384 }
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sq_dist(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
    }

    #[tokio::test]
    async fn test_embed_dimensions() {
        let embedder = HashingEmbedder::new(384);
        let result = embedder.embed("hello world").await.unwrap();
        assert_eq!(result.len(), 384);
    }

    #[test]
    fn test_embed_deterministic() {
        let embedder = HashingEmbedder::new(384);
        let a = embedder.embed_sync("hello");
        let b = embedder.embed_sync("hello");
        assert_eq!(a, b, "same input should produce same output");
    }

    #[test]
    fn test_embed_different_inputs() {
        let embedder = HashingEmbedder::new(384);
        let a = embedder.embed_sync("hello");
        let b = embedder.embed_sync("world");
        assert_ne!(a, b, "different inputs should produce different outputs");
    }

    #[test]
    fn test_embed_normalized() {
        let embedder = HashingEmbedder::new(384);
        let vec = embedder.embed_sync("test normalization");
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!(
            (norm - 1.0).abs() < 0.01,
            "vector should be approximately unit length, got {norm}"
        );
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(16);
        assert!(embedder.embed_sync("  ").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_shared_characters_are_closer() {
        let embedder = HashingEmbedder::new(384);
        let query = embedder.embed_sync("深度学习 是 什么");
        let weather = embedder.embed_sync("今天天气很好");
        let ml = embedder.embed_sync("机器学习和深度学习的区别");
        assert!(sq_dist(&query, &ml) < sq_dist(&query, &weather));
    }

    #[tokio::test]
    async fn test_embed_batch() {
        let embedder = HashingEmbedder::new(128);
        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let results = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(results.len(), 3);
        for vec in &results {
            assert_eq!(vec.len(), 128);
        }
    }

    #[test]
    fn test_default_dimensions() {
        let embedder = HashingEmbedder::default();
        assert_eq!(embedder.dimensions(), 384);
    }
}
