//! In-memory store for tests and offline development.
//!
//! Implements all three storage traits behind one mutex, so
//! [`replace_document_index`](super::VectorStore::replace_document_index)
//! is atomic by construction. Search is exact brute force under the
//! configured metric; the candidate-breadth hint is irrelevant here and
//! ignored.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{NotFoundKind, RagError, RagResult};
use crate::vector::DistanceMetric;

use super::{
    ChunkRecord, DocumentSource, DocumentStatus, IndexEntry, SearchHit, Turn, TurnRole, TurnStore,
    VectorStore,
};

struct DocumentRow {
    content: String,
    status: DocumentStatus,
}

struct EmbeddingRow {
    document_id: Uuid,
    vector: Vec<f32>,
}

#[derive(Default)]
struct Inner {
    documents: HashMap<Uuid, DocumentRow>,
    chunks: HashMap<Uuid, ChunkRecord>,
    // Keyed by chunk id; one vector per chunk.
    embeddings: HashMap<Uuid, EmbeddingRow>,
    chats: HashMap<Uuid, Vec<Turn>>,
}

pub struct MemoryStore {
    metric: DistanceMetric,
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new(metric: DistanceMetric) -> Self {
        Self {
            metric,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Registers a document with [`DocumentStatus::Pending`].
    pub fn add_document(&self, content: impl Into<String>) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.lock().documents.insert(
            id,
            DocumentRow {
                content: content.into(),
                status: DocumentStatus::Pending,
            },
        );
        id
    }

    pub fn create_chat(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.lock().chats.insert(id, Vec::new());
        id
    }

    pub fn embedding_count(&self) -> usize {
        self.inner.lock().embeddings.len()
    }

    pub fn embedding_for(&self, chunk_id: Uuid) -> Option<Vec<f32>> {
        self.inner
            .lock()
            .embeddings
            .get(&chunk_id)
            .map(|row| row.vector.clone())
    }

    pub fn chunk_count_for(&self, document_id: Uuid) -> usize {
        self.inner
            .lock()
            .chunks
            .values()
            .filter(|chunk| chunk.document_id == document_id)
            .count()
    }

    pub fn turn_count(&self, chat_id: Uuid) -> usize {
        self.inner
            .lock()
            .chats
            .get(&chat_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DistanceMetric::Cosine)
    }
}

#[async_trait]
impl DocumentSource for MemoryStore {
    async fn fetch_text(&self, document_id: Uuid) -> RagResult<String> {
        self.inner
            .lock()
            .documents
            .get(&document_id)
            .map(|row| row.content.clone())
            .ok_or_else(|| RagError::not_found(NotFoundKind::Document, document_id))
    }

    async fn status(&self, document_id: Uuid) -> RagResult<DocumentStatus> {
        self.inner
            .lock()
            .documents
            .get(&document_id)
            .map(|row| row.status)
            .ok_or_else(|| RagError::not_found(NotFoundKind::Document, document_id))
    }

    async fn set_status(&self, document_id: Uuid, status: DocumentStatus) -> RagResult<()> {
        let mut inner = self.inner.lock();
        let row = inner
            .documents
            .get_mut(&document_id)
            .ok_or_else(|| RagError::not_found(NotFoundKind::Document, document_id))?;
        row.status = status;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn upsert(&self, chunk_id: Uuid, document_id: Uuid, vector: &[f32]) -> RagResult<()> {
        self.inner.lock().embeddings.insert(
            chunk_id,
            EmbeddingRow {
                document_id,
                vector: vector.to_vec(),
            },
        );
        Ok(())
    }

    async fn replace_document_index(
        &self,
        document_id: Uuid,
        entries: Vec<IndexEntry>,
    ) -> RagResult<()> {
        let mut inner = self.inner.lock();
        if !inner.documents.contains_key(&document_id) {
            return Err(RagError::not_found(NotFoundKind::Document, document_id));
        }
        inner.chunks.retain(|_, chunk| chunk.document_id != document_id);
        inner.embeddings.retain(|_, row| row.document_id != document_id);
        let now = Utc::now();
        for entry in entries {
            inner.chunks.insert(
                entry.chunk_id,
                ChunkRecord {
                    id: entry.chunk_id,
                    document_id,
                    content: entry.content,
                    created_at: now,
                },
            );
            inner.embeddings.insert(
                entry.chunk_id,
                EmbeddingRow {
                    document_id,
                    vector: entry.vector,
                },
            );
        }
        if let Some(row) = inner.documents.get_mut(&document_id) {
            row.status = DocumentStatus::Embedded;
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        fetch_k: usize,
        _search_width: u32,
        document_filter: Option<&[Uuid]>,
    ) -> RagResult<Vec<SearchHit>> {
        let inner = self.inner.lock();
        let mut hits: Vec<SearchHit> = inner
            .embeddings
            .iter()
            .filter(|(_, row)| match document_filter {
                Some(ids) => ids.contains(&row.document_id),
                None => true,
            })
            .map(|(chunk_id, row)| SearchHit {
                chunk_id: *chunk_id,
                document_id: row.document_id,
                embedding: row.vector.clone(),
                distance: self.metric.distance(query, &row.vector),
            })
            .collect();
        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(fetch_k);
        Ok(hits)
    }

    async fn chunk_contents(&self, chunk_ids: &[Uuid]) -> RagResult<Vec<ChunkRecord>> {
        let inner = self.inner.lock();
        Ok(chunk_ids
            .iter()
            .filter_map(|id| inner.chunks.get(id).cloned())
            .collect())
    }
}

#[async_trait]
impl TurnStore for MemoryStore {
    async fn append_turn(&self, chat_id: Uuid, role: TurnRole, content: &str) -> RagResult<Turn> {
        let mut inner = self.inner.lock();
        let turns = inner
            .chats
            .get_mut(&chat_id)
            .ok_or_else(|| RagError::not_found(NotFoundKind::Chat, chat_id))?;
        let turn = Turn {
            id: Uuid::new_v4(),
            chat_id,
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        turns.push(turn.clone());
        Ok(turn)
    }

    async fn recent_turns(&self, chat_id: Uuid, limit: usize) -> RagResult<Vec<Turn>> {
        let inner = self.inner.lock();
        let turns = inner
            .chats
            .get(&chat_id)
            .ok_or_else(|| RagError::not_found(NotFoundKind::Chat, chat_id))?;
        Ok(turns.iter().rev().take(limit).cloned().collect())
    }
}
