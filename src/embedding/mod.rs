//! Embedding backends.
//!
//! All vectors leave this module L2-normalized, so cosine similarity and
//! inner product are monotonic transforms of each other downstream. The
//! single-text path delegates to the batch path, which makes batch and
//! single encoding numerically identical by construction. Backend
//! failures surface as retryable [`RagError::EmbeddingBackend`] errors;
//! retry policy belongs to the caller.

pub mod http;
pub mod offline;

use async_trait::async_trait;

use crate::error::{RagError, RagResult};

pub use http::HttpEmbedder;
pub use offline::OfflineEmbedder;

/// Maps text to fixed-dimension normalized vectors, preserving order.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Fixed vector dimension this backend produces.
    fn dimension(&self) -> usize;

    /// Encodes a batch of texts, one vector per input, in input order.
    async fn embed_texts(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>>;

    /// Encodes a single text through the batch path.
    async fn embed_text(&self, text: &str) -> RagResult<Vec<f32>> {
        let batch = [text.to_string()];
        let mut vectors = self.embed_texts(&batch).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::EmbeddingBackend("backend returned no vector".into()))
    }
}

/// Validates a backend response against the input count and the
/// deployment dimension.
pub(crate) fn check_batch(
    vectors: &[Vec<f32>],
    expected_count: usize,
    dimension: usize,
) -> RagResult<()> {
    if vectors.len() != expected_count {
        return Err(RagError::EmbeddingBackend(format!(
            "backend returned {} vectors for {} inputs",
            vectors.len(),
            expected_count
        )));
    }
    for vector in vectors {
        if vector.len() != dimension {
            return Err(RagError::EmbeddingBackend(format!(
                "dimension mismatch: backend returned {}, deployment expects {}",
                vector.len(),
                dimension
            )));
        }
    }
    Ok(())
}
