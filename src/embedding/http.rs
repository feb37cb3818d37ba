//! OpenAI-compatible HTTP embedding backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{RagError, RagResult};
use crate::vector::math;

use super::{check_batch, Embedder};

/// Embedding client for OpenAI-compatible `/embeddings` endpoints.
///
/// Failed requests are reported as retryable backend errors and never
/// retried here; callers own the retry policy.
#[derive(Clone)]
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
}

impl HttpEmbedder {
    /// Builds a client against `base_url` (for example `https://api.openai.com/v1`).
    pub fn new(base_url: &str, model: impl Into<String>, dimension: usize) -> Self {
        let endpoint = format!("{}/embeddings", base_url.trim_end_matches('/'));
        Self {
            client: reqwest::Client::new(),
            endpoint,
            model: model.into(),
            api_key: None,
            dimension,
        }
    }

    /// Attaches a bearer token sent with every request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_texts(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            encoding_format: "float",
        };
        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RagError::EmbeddingBackend(format!("embeddings request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(RagError::EmbeddingBackend(format!(
                "embeddings request failed ({}): {}",
                status, body
            )));
        }

        let mut parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            RagError::EmbeddingBackend(format!("failed to parse embedding response: {}", e))
        })?;

        // Compatible servers may return entries out of order; the index
        // field restores input order.
        parsed.data.sort_by_key(|entry| entry.index);
        let mut vectors: Vec<Vec<f32>> = parsed
            .data
            .into_iter()
            .map(|entry| entry.embedding)
            .collect();
        check_batch(&vectors, texts.len(), self.dimension)?;
        for vector in &mut vectors {
            math::l2_normalize(vector);
        }
        Ok(vectors)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        let embedder = HttpEmbedder::new("http://localhost:8080/v1/", "nomic-embed-text", 384);
        assert_eq!(embedder.endpoint, "http://localhost:8080/v1/embeddings");
    }

    #[test]
    fn test_response_entries_sort_by_index() {
        let raw = r#"{"data":[{"embedding":[0.0,1.0],"index":1},{"embedding":[1.0,0.0],"index":0}]}"#;
        let mut parsed: EmbeddingResponse = serde_json::from_str(raw).unwrap();
        parsed.data.sort_by_key(|entry| entry.index);
        assert_eq!(parsed.data[0].embedding, vec![1.0, 0.0]);
        assert_eq!(parsed.data[1].embedding, vec![0.0, 1.0]);
    }
}
