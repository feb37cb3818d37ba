//! Retrieval and context assembly for a RAG chat backend.
//!
//! Documents are split into bounded, overlapping chunks, embedded into
//! normalized vectors, and written to a searchable index in one atomic
//! batch per document. At query time the pipeline embeds the query,
//! fetches nearest-neighbor candidates, reranks them with maximal
//! marginal relevance, and joins the survivors with a bounded window of
//! chat history into the input for a streaming generator. The completed
//! assistant reply is persisted only when the stream finishes cleanly.
//!
//! Ingest flow: document text → [`Chunker`] → [`Embedder`] →
//! [`VectorStore::replace_document_index`](store::VectorStore::replace_document_index).
//! Query flow: query → [`Embedder`] → [`VectorStore::search`](store::VectorStore::search)
//! → [`mmr_select`] → [`ContextAssembler`] → [`Generator`].
//!
//! Storage, embedding, and generation are trait seams injected by
//! constructor; [`MemoryStore`] and [`OfflineEmbedder`] run the whole
//! pipeline without external services. The Postgres implementations use
//! pgvector with an HNSW index. Vector dimension and distance metric are
//! deployment constants validated at pipeline construction, never per
//! call.

pub mod chat;
pub mod chunking;
pub mod config;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod ingest;
pub mod retrieve;
pub mod store;
pub mod vector;

pub use chat::{AssembledContext, ContextAssembler, HistoryCache};
pub use chunking::{Chunker, HeuristicCounter, TokenCounter};
pub use config::{
    ChunkingConfig, EmbeddingConfig, HistoryConfig, RagConfig, RetrievalConfig,
};
pub use embedding::{Embedder, HttpEmbedder, OfflineEmbedder};
pub use error::{NotFoundKind, RagError, RagResult};
pub use generation::{FragmentStream, Generator};
pub use ingest::{IngestPipeline, IngestReport};
pub use retrieve::{RetrievedChunk, Retriever};
pub use store::{
    ChunkRecord, DocumentSource, DocumentStatus, IndexEntry, MemoryStore, PostgresStore,
    SearchHit, Turn, TurnRole, TurnStore, VectorStore,
};
pub use vector::{mmr_select, DistanceMetric};
