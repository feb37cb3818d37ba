//! Deployment configuration for the retrieval pipeline.
//!
//! Vector dimension and distance metric are deployment-time constants:
//! the index writer and the search path must agree on both, so they live
//! here rather than on individual calls. [`RagConfig::validate`] runs at
//! pipeline construction and fails fast; invalid values are never
//! silently coerced.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, RagResult};
use crate::vector::DistanceMetric;

/// Token-budget parameters for the chunker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum tokens per chunk.
    pub chunk_size_tokens: usize,
    /// Tokens repeated from the tail of the previous chunk.
    pub chunk_overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size_tokens: 256,
            chunk_overlap_tokens: 50,
        }
    }
}

/// Embedding backend parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Fixed vector dimension for this deployment (e.g. 384 or 768).
    pub dimension: usize,
    /// Texts per backend call during bulk ingestion.
    pub batch_size: usize,
    /// Deadline for a single backend call.
    pub timeout_seconds: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            batch_size: 64,
            timeout_seconds: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Search and rerank parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Results returned to the caller after reranking.
    pub top_k: usize,
    /// Nearest-neighbor candidates fetched before MMR narrows to top_k.
    pub fetch_k: usize,
    /// MMR relevance/diversity weight, in [0, 1].
    pub lambda: f32,
    /// ANN candidate breadth (hnsw.ef_search).
    pub search_width: u32,
    /// Distance metric the index was built for.
    pub metric: DistanceMetric,
    /// Deadline for one similarity search.
    pub timeout_seconds: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 4,
            fetch_k: 20,
            lambda: 0.5,
            search_width: 64,
            metric: DistanceMetric::Cosine,
            timeout_seconds: 10,
        }
    }
}

impl RetrievalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Bounded conversation-history parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Most-recent turns presented to the generator.
    pub window: usize,
    /// Turns retained per chat in the in-process cache.
    pub capacity: usize,
    /// Idle lifetime of a chat's cached history.
    pub ttl_seconds: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            window: 3,
            capacity: 64,
            ttl_seconds: 3600,
        }
    }
}

impl HistoryConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Top-level configuration shared by ingestion and retrieval.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagConfig {
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub history: HistoryConfig,
}

impl RagConfig {
    /// Checks every deployment invariant, failing on the first violation.
    pub fn validate(&self) -> RagResult<()> {
        if self.chunking.chunk_size_tokens == 0 {
            return Err(RagError::Config("chunk size must be greater than zero".into()));
        }
        if self.chunking.chunk_overlap_tokens >= self.chunking.chunk_size_tokens {
            return Err(RagError::Config(format!(
                "chunk overlap ({}) must be less than chunk size ({})",
                self.chunking.chunk_overlap_tokens, self.chunking.chunk_size_tokens
            )));
        }
        if self.embedding.dimension == 0 {
            return Err(RagError::Config("embedding dimension must be greater than zero".into()));
        }
        if self.embedding.batch_size == 0 {
            return Err(RagError::Config("embedding batch size must be greater than zero".into()));
        }
        if self.retrieval.top_k == 0 {
            return Err(RagError::Config("top_k must be greater than zero".into()));
        }
        if self.retrieval.fetch_k < self.retrieval.top_k {
            return Err(RagError::Config(format!(
                "fetch_k ({}) must be at least top_k ({})",
                self.retrieval.fetch_k, self.retrieval.top_k
            )));
        }
        if (self.retrieval.search_width as usize) < self.retrieval.fetch_k {
            return Err(RagError::Config(format!(
                "search_width ({}) must be at least fetch_k ({})",
                self.retrieval.search_width, self.retrieval.fetch_k
            )));
        }
        if !(0.0..=1.0).contains(&self.retrieval.lambda) {
            return Err(RagError::Config(format!(
                "lambda ({}) must be within [0, 1]",
                self.retrieval.lambda
            )));
        }
        if self.history.capacity == 0 {
            return Err(RagError::Config("history capacity must be greater than zero".into()));
        }
        Ok(())
    }
}
