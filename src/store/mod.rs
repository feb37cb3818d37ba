//! Storage collaborators for the retrieval pipeline.
//!
//! Three seams, injected by constructor so tests can substitute fakes:
//! [`DocumentSource`] resolves a document's extracted text and tracks its
//! processing status; [`VectorStore`] owns chunk rows, embedding rows, and
//! the similarity index; [`TurnStore`] appends and reads conversation
//! turns ordered by creation time. The vector index is derived state:
//! chunk content always resolves through the chunk rows, never from an
//! index entry.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RagError, RagResult};

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Processing state of a document's index.
///
/// Ingestion moves `Pending → Embedding → Embedded`; a failed run restores
/// the status captured before the attempt so retry starts clean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Embedding,
    Embedded,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Embedding => "embedding",
            DocumentStatus::Embedded => "embedded",
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DocumentStatus::Pending),
            "embedding" => Ok(DocumentStatus::Embedding),
            "embedded" => Ok(DocumentStatus::Embedded),
            other => Err(RagError::Config(format!("unknown document status: {other}"))),
        }
    }
}

/// Author of a conversation turn. Exactly two variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for TurnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TurnRole {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(TurnRole::User),
            "assistant" => Ok(TurnRole::Assistant),
            other => Err(RagError::Config(format!("unknown turn role: {other}"))),
        }
    }
}

/// One stored chunk of a document's text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: Uuid,
    pub document_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// One message in a chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub role: TurnRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Chunk content plus its vector, staged for an atomic index write.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk_id: Uuid,
    pub content: String,
    pub vector: Vec<f32>,
}

/// One nearest-neighbor result, ascending distance from the query.
/// Carries the stored vector so the reranker can compute pairwise
/// similarities without a second read.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub embedding: Vec<f32>,
    pub distance: f32,
}

/// Resolves document text and tracks document processing status.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Extracted text for a document. `NotFound` if the id is unknown.
    async fn fetch_text(&self, document_id: Uuid) -> RagResult<String>;

    /// Current processing status. `NotFound` if the id is unknown.
    async fn status(&self, document_id: Uuid) -> RagResult<DocumentStatus>;

    async fn set_status(&self, document_id: Uuid, status: DocumentStatus) -> RagResult<()>;
}

/// Owns chunk rows, embedding rows, and the similarity index.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Writes one embedding record, idempotent per `chunk_id`: a repeat
    /// upsert replaces the stored vector instead of adding a row.
    async fn upsert(&self, chunk_id: Uuid, document_id: Uuid, vector: &[f32]) -> RagResult<()>;

    /// Replaces a document's entire index in one atomic write: prior
    /// chunk and embedding rows go, `entries` come in, and the document
    /// is marked [`DocumentStatus::Embedded`], all or nothing. Readers
    /// never observe a half-embedded document.
    async fn replace_document_index(
        &self,
        document_id: Uuid,
        entries: Vec<IndexEntry>,
    ) -> RagResult<()>;

    /// Nearest neighbors of `query`, ascending by distance, truncated to
    /// `fetch_k`. `search_width` is the ANN candidate breadth scanned
    /// before truncation. An optional document filter scopes the search;
    /// an empty index or a non-matching filter yields an empty Vec.
    async fn search(
        &self,
        query: &[f32],
        fetch_k: usize,
        search_width: u32,
        document_filter: Option<&[Uuid]>,
    ) -> RagResult<Vec<SearchHit>>;

    /// Resolves chunk content by id, in no particular order. Ids without
    /// a row are omitted rather than an error.
    async fn chunk_contents(&self, chunk_ids: &[Uuid]) -> RagResult<Vec<ChunkRecord>>;
}

/// Appends and reads conversation turns.
#[async_trait]
pub trait TurnStore: Send + Sync {
    /// Appends a turn to a chat. `NotFound` if the chat is unknown.
    async fn append_turn(&self, chat_id: Uuid, role: TurnRole, content: &str) -> RagResult<Turn>;

    /// Up to `limit` most recent turns, newest first. `NotFound` if the
    /// chat is unknown; a known chat with no turns yields an empty Vec.
    async fn recent_turns(&self, chat_id: Uuid, limit: usize) -> RagResult<Vec<Turn>>;
}
