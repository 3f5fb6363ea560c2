//! Retrieval service: embeds texts and keeps the vector index and document
//! store in step.
//!
//! Embedding happens outside the lock. Ingest then takes the write lock for
//! the joint append; queries share the read lock, so a query never observes
//! a half-applied ingest.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::db::models::SearchResult;
use crate::db::{Db, DbError};
use crate::embedder::{Embedder, EmbedderError};

/// Default number of documents returned by a query.
pub const DEFAULT_TOP_K: usize = 3;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("invalid argument `{field}`: {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    #[error("embedding provider error: {0}")]
    Embedding(#[from] EmbedderError),

    #[error("embedding dimension mismatch: index expects {expected}, provider produces {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Db(DbError),
}

impl From<DbError> for RagError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::DimensionMismatch { expected, actual } => {
                RagError::DimensionMismatch { expected, actual }
            }
            other => RagError::Db(other),
        }
    }
}

/// Outcome of a single ingest call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub indexed: usize,
    pub total: usize,
}

impl fmt::Display for IngestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "indexed {} documents, total now {}",
            self.indexed, self.total
        )
    }
}

pub struct RetrievalService {
    db: RwLock<Db>,
    embedder: Arc<dyn Embedder>,
    embed_timeout: Duration,
}

impl RetrievalService {
    /// Create a service with an empty index of `dimensions`.
    ///
    /// Fails if the provider's dimensionality differs from the index's.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        dimensions: usize,
        embed_timeout: Duration,
    ) -> Result<Self, RagError> {
        if embedder.dimensions() != dimensions {
            return Err(RagError::DimensionMismatch {
                expected: dimensions,
                actual: embedder.dimensions(),
            });
        }
        Ok(Self {
            db: RwLock::new(Db::new(dimensions)),
            embedder,
            embed_timeout,
        })
    }

    /// Number of documents currently stored.
    pub async fn len(&self) -> usize {
        self.db.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.db.read().await.is_empty()
    }

    /// Embed and index `texts`; both the index and the store grow, or neither.
    pub async fn ingest(&self, texts: Vec<String>) -> Result<IngestReport, RagError> {
        if texts.is_empty() {
            return Ok(IngestReport {
                indexed: 0,
                total: self.len().await,
            });
        }

        let vectors = self
            .with_timeout(self.embedder.embed_batch(&texts))
            .await?;
        if vectors.len() != texts.len() {
            return Err(EmbedderError::CountMismatch {
                expected: texts.len(),
                actual: vectors.len(),
            }
            .into());
        }

        let indexed = texts.len();
        let mut db = self.db.write().await;
        let slots = db.insert_documents(texts, &vectors)?;
        let total = db.len();
        drop(db);

        info!("Indexed {indexed} documents (slots {slots:?}), total {total}");
        Ok(IngestReport { indexed, total })
    }

    /// Return up to `top_k` stored documents nearest to `text`.
    pub async fn query(&self, text: &str, top_k: usize) -> Result<Vec<SearchResult>, RagError> {
        if text.trim().is_empty() {
            return Err(RagError::InvalidArgument {
                field: "query",
                reason: "must not be empty".to_string(),
            });
        }
        if top_k < 1 {
            return Err(RagError::InvalidArgument {
                field: "top_k",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.is_empty().await {
            debug!("Query on empty store");
            return Ok(Vec::new());
        }

        let query_vector = self.with_timeout(self.embedder.embed(text)).await?;

        let db = self.db.read().await;
        let results = db.search(&query_vector, top_k)?;
        debug!("Query returned {} of {} documents", results.len(), db.len());
        Ok(results)
    }

    async fn with_timeout<T>(
        &self,
        call: impl Future<Output = Result<T, EmbedderError>>,
    ) -> Result<T, EmbedderError> {
        tokio::time::timeout(self.embed_timeout, call)
            .await
            .map_err(|_| EmbedderError::Timeout(self.embed_timeout))?
    }
}
