//! Embedder trait, provider selection, and shared error types.
pub mod hashing;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::config::{EmbeddingConfig, ProviderKind};
use hashing::HashingEmbedder;
use openai::OpenAiEmbedder;

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("provider returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("provider returned {actual} embeddings for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },

    #[error("missing API key: set {0}")]
    MissingApiKey(String),

    #[error("embedding timed out after {0:?}")]
    Timeout(Duration),
}

/// Turns texts into fixed-dimension vectors.
///
/// Implementations return exactly one vector per input, in input order, or
/// fail.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed multiple texts.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        match vectors.len() {
            1 => Ok(vectors.remove(0)),
            actual => Err(EmbedderError::CountMismatch {
                expected: 1,
                actual,
            }),
        }
    }

    /// Dimensionality of the produced vectors.
    fn dimensions(&self) -> usize;
}

/// Build the configured provider. Called once at startup.
pub fn from_config(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbedderError> {
    let embedder: Arc<dyn Embedder> = match config.provider {
        ProviderKind::Hashing => Arc::new(HashingEmbedder::new(config.dimensions)),
        kind => Arc::new(OpenAiEmbedder::from_config(kind, config)?),
    };
    info!(
        "Embedding provider: {} ({} dimensions)",
        config.provider,
        embedder.dimensions()
    );
    Ok(embedder)
}
