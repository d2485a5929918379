use crate::{Chunk, RagError, ScoredChunk};
use async_trait::async_trait;

/// Persistent store of chunk vectors answering nearest-neighbour queries.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn backend(&self) -> &str;

    /// Prepares the index for vectors from `embedding_model`, rejecting a
    /// dimension that differs from what the index already holds.
    async fn ensure_ready(&self, embedding_model: &str, dimensions: usize)
        -> Result<(), RagError>;

    async fn insert(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<(), RagError>;

    /// Makes every insert so far durable. Backends that write through on
    /// insert have nothing to do.
    async fn flush(&self) -> Result<(), RagError> {
        Ok(())
    }

    /// Up to `limit` chunks by descending similarity. An empty index yields an
    /// empty vector.
    async fn search(&self, query_vector: &[f32], limit: usize)
        -> Result<Vec<ScoredChunk>, RagError>;

    async fn count(&self) -> Result<usize, RagError>;

    /// Distinct source paths of the indexed chunks.
    async fn sources(&self) -> Result<Vec<String>, RagError>;
}

/// Pairwise (query, passage) relevance model.
///
/// Scoring takes `&self` so one loaded model can serve concurrent questions.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    fn model_name(&self) -> &str;

    /// One score per passage, in passage order. Higher is more relevant.
    async fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>, RagError>;
}

/// Hosted chat model turning (context, question) into an answer.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, context: &str, question: &str) -> Result<String, RagError>;
}
