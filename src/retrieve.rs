//! Query-time retrieval: embed the query, fetch candidates, rerank with
//! MMR, and resolve chunk content.
//!
//! The pipeline degrades rather than fails: an empty index or a filter
//! that matches nothing returns an empty result so the caller can
//! generate without grounding context. Backend problems do fail, with
//! retryable errors; the retriever never retries internally.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::RagConfig;
use crate::embedding::Embedder;
use crate::error::{RagError, RagResult};
use crate::store::VectorStore;
use crate::vector::mmr_select;

/// One retrieved chunk, in final rank order. `distance` is the index
/// distance of the original hit, kept for observability.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub content: String,
    pub distance: f32,
}

pub struct Retriever {
    config: RagConfig,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorStore>,
}

impl Retriever {
    pub fn new(
        config: RagConfig,
        embedder: Arc<dyn Embedder>,
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
            embedder,
            index,
        })
    }

    /// Retrieves the top chunks for a query across the whole index.
    pub async fn retrieve(&self, query: &str) -> RagResult<Vec<RetrievedChunk>> {
        self.retrieve_scoped(query, None).await
    }

    /// Same as [`retrieve`](Self::retrieve), restricted to the given
    /// documents when a filter is present.
    pub async fn retrieve_scoped(
        &self,
        query: &str,
        document_filter: Option<&[Uuid]>,
    ) -> RagResult<Vec<RetrievedChunk>> {
        let embed_timeout = self.config.embedding.timeout();
        let query_vector = tokio::time::timeout(embed_timeout, self.embedder.embed_text(query))
            .await
            .map_err(|_| {
                RagError::EmbeddingBackend(format!("query embedding exceeded {embed_timeout:?}"))
            })??;

        let retrieval = &self.config.retrieval;
        let search_timeout = retrieval.timeout();
        let hits = tokio::time::timeout(
            search_timeout,
            self.index.search(
                &query_vector,
                retrieval.fetch_k,
                retrieval.search_width,
                document_filter,
            ),
        )
        .await
        .map_err(|_| RagError::SearchTimeout(search_timeout))??;

        if hits.is_empty() {
            debug!("no candidates for query; returning empty context");
            return Ok(Vec::new());
        }

        let candidates: Vec<Vec<f32>> = hits.iter().map(|hit| hit.embedding.clone()).collect();
        let selected = mmr_select(&query_vector, &candidates, retrieval.top_k, retrieval.lambda);

        let chunk_ids: Vec<Uuid> = selected.iter().map(|&i| hits[i].chunk_id).collect();
        let mut contents: HashMap<Uuid, String> = self
            .index
            .chunk_contents(&chunk_ids)
            .await?
            .into_iter()
            .map(|record| (record.id, record.content))
            .collect();

        let mut out = Vec::with_capacity(selected.len());
        for i in selected {
            let hit = &hits[i];
            match contents.remove(&hit.chunk_id) {
                Some(content) => out.push(RetrievedChunk {
                    chunk_id: hit.chunk_id,
                    document_id: hit.document_id,
                    content,
                    distance: hit.distance,
                }),
                // An index entry can outlive its chunk row mid-reindex;
                // skip it rather than fail the query.
                None => warn!(chunk_id = %hit.chunk_id, "hit without chunk content, skipped"),
            }
        }
        Ok(out)
    }
}
