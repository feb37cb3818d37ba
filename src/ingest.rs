//! Document ingestion: chunk, embed in batches, replace the index.
//!
//! Ingestion is status-tracked and atomic per document. The document is
//! marked [`DocumentStatus::Embedding`] for the duration of the run;
//! success swaps the whole index in one write and marks it
//! [`DocumentStatus::Embedded`], failure restores the status the
//! document had before the run so a retry starts from a clean slate.
//! Chunk vectors never reach the index one by one, so a crashed run
//! leaves the previous index intact rather than a half-written one.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunking::Chunker;
use crate::config::RagConfig;
use crate::embedding::Embedder;
use crate::error::{RagError, RagResult};
use crate::store::{DocumentSource, DocumentStatus, IndexEntry, VectorStore};

/// Outcome of one document ingestion.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub document_id: Uuid,
    pub chunks_indexed: usize,
}

pub struct IngestPipeline {
    config: RagConfig,
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    documents: Arc<dyn DocumentSource>,
    index: Arc<dyn VectorStore>,
}

impl IngestPipeline {
    /// Builds a pipeline with the default heuristic token counter.
    /// Fails fast on invalid configuration or an embedder whose dimension
    /// disagrees with the deployment dimension.
    pub fn new(
        config: RagConfig,
        embedder: Arc<dyn Embedder>,
        documents: Arc<dyn DocumentSource>,
        index: Arc<dyn VectorStore>,
    ) -> RagResult<Self> {
        let chunker = Chunker::new(config.chunking.clone())?;
        Self::with_chunker(config, chunker, embedder, documents, index)
    }

    /// Same as [`new`](Self::new) but with a caller-built chunker, e.g.
    /// one counting tokens with a real tokenizer.
    pub fn with_chunker(
        config: RagConfig,
        chunker: Chunker,
        embedder: Arc<dyn Embedder>,
        documents: Arc<dyn DocumentSource>,
        index: Arc<dyn VectorStore>,
    ) -> RagResult<Self> {
        config.validate()?;
        if embedder.dimension() != config.embedding.dimension {
            return Err(RagError::Config(format!(
                "embedder produces dimension {}, deployment expects {}",
                embedder.dimension(),
                config.embedding.dimension
            )));
        }
        Ok(Self {
            config,
            chunker,
            embedder,
            documents,
            index,
        })
    }

    /// Ingests one document end to end: fetch text, chunk, embed, swap
    /// the index. On any failure the document's prior status is restored
    /// and the error propagates untouched.
    pub async fn ingest_document(&self, document_id: Uuid) -> RagResult<IngestReport> {
        let text = self.documents.fetch_text(document_id).await?;
        let prior_status = self.documents.status(document_id).await?;
        self.documents
            .set_status(document_id, DocumentStatus::Embedding)
            .await?;

        match self.index_document(document_id, &text).await {
            Ok(report) => Ok(report),
            Err(err) => {
                if let Err(revert_err) = self.documents.set_status(document_id, prior_status).await
                {
                    warn!(%document_id, error = %revert_err, "failed to restore status after ingestion error");
                }
                Err(err)
            }
        }
    }

    /// Ingests several documents concurrently. Each document gets its own
    /// result; one failure never aborts the others.
    pub async fn ingest_documents(
        &self,
        document_ids: &[Uuid],
    ) -> Vec<(Uuid, RagResult<IngestReport>)> {
        let runs = document_ids
            .iter()
            .map(|id| async move { (*id, self.ingest_document(*id).await) });
        join_all(runs).await
    }

    async fn index_document(&self, document_id: Uuid, text: &str) -> RagResult<IngestReport> {
        let chunks: Vec<String> = self.chunker.split(text).collect();
        if chunks.is_empty() {
            // Nothing extractable; the document still completes with an
            // empty index.
            self.index
                .replace_document_index(document_id, Vec::new())
                .await?;
            return Ok(IngestReport {
                document_id,
                chunks_indexed: 0,
            });
        }

        let vectors = self.embed_chunks(&chunks).await?;
        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(content, vector)| IndexEntry {
                chunk_id: Uuid::new_v4(),
                content,
                vector,
            })
            .collect();
        let chunks_indexed = entries.len();
        self.index
            .replace_document_index(document_id, entries)
            .await?;
        info!(%document_id, chunks = chunks_indexed, "document indexed");
        Ok(IngestReport {
            document_id,
            chunks_indexed,
        })
    }

    /// Embeds chunk texts in deployment-sized batches submitted
    /// concurrently. Results come back in input order, one vector per
    /// chunk, or the whole run fails.
    async fn embed_chunks(&self, chunks: &[String]) -> RagResult<Vec<Vec<f32>>> {
        let timeout = self.config.embedding.timeout();
        let calls = chunks
            .chunks(self.config.embedding.batch_size)
            .map(|batch| async move {
                tokio::time::timeout(timeout, self.embedder.embed_texts(batch))
                    .await
                    .map_err(|_| {
                        RagError::EmbeddingBackend(format!(
                            "embedding call exceeded {timeout:?}"
                        ))
                    })?
            });

        let mut vectors = Vec::with_capacity(chunks.len());
        for result in join_all(calls).await {
            vectors.extend(result?);
        }
        if vectors.len() != chunks.len() {
            return Err(RagError::EmbeddingBackend(format!(
                "expected {} vectors, backend returned {}",
                chunks.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }
}
