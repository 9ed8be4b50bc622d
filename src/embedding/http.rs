//! OpenAI-compatible HTTP embedding adapter.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use super::EmbeddingProvider;
use crate::types::{RetrievalError, Result};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Embedding provider backed by an OpenAI-compatible `/embeddings` endpoint.
///
/// Works against any server speaking the same wire format (OpenAI, Ollama,
/// vLLM, text-embeddings-inference). The embedding dimension is part of the
/// configuration because the store schema is bound to it before the first
/// request is ever made.
#[derive(Clone)]
pub struct HttpEmbeddingProvider {
    client: Client,
    endpoint: Url,
    model: String,
    api_key: Option<String>,
    dimension: usize,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbeddingProvider {
    /// Creates a provider for `model` served at `base_url` (e.g.
    /// `https://api.openai.com/v1`).
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        dimension: usize,
    ) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|err| RetrievalError::Config(format!("invalid embedding endpoint: {err}")))?;
        // Url::join drops the last path segment unless the base ends in '/'.
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        let endpoint = base
            .join("embeddings")
            .map_err(|err| RetrievalError::Config(format!("invalid embedding endpoint: {err}")))?;
        let client = Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|err| RetrievalError::Embedding(err.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            model: model.into(),
            api_key,
            dimension,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let mut request = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| RetrievalError::Embedding(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Embedding(format!(
                "embedding endpoint returned {status}: {detail}"
            )));
        }

        let mut payload: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|err| RetrievalError::Embedding(err.to_string()))?;
        if payload.data.len() != texts.len() {
            return Err(RetrievalError::Embedding(format!(
                "expected {} vectors, endpoint returned {}",
                texts.len(),
                payload.data.len()
            )));
        }

        // The response order is not guaranteed; the index field is.
        payload.data.sort_by_key(|row| row.index);
        for row in &payload.data {
            if row.embedding.len() != self.dimension {
                return Err(RetrievalError::Embedding(format!(
                    "model '{}' returned dimension {}, store is bound to {}",
                    self.model,
                    row.embedding.len(),
                    self.dimension
                )));
            }
        }
        Ok(payload.data.into_iter().map(|row| row.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn embeds_batch_preserving_input_order() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(200).json_body(serde_json::json!({
                    "data": [
                        {"index": 1, "embedding": [0.0, 1.0, 0.0]},
                        {"index": 0, "embedding": [1.0, 0.0, 0.0]},
                    ]
                }));
            })
            .await;

        let provider = HttpEmbeddingProvider::new(
            &format!("{}/v1/", server.base_url()),
            "test-model",
            None,
            3,
        )
        .unwrap();

        let vectors = provider
            .embed_batch(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_an_embedding_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(200).json_body(serde_json::json!({
                    "data": [{"index": 0, "embedding": [0.5, 0.5]}]
                }));
            })
            .await;

        let provider = HttpEmbeddingProvider::new(
            &format!("{}/v1/", server.base_url()),
            "test-model",
            None,
            3,
        )
        .unwrap();

        let err = provider.embed("anything").await.unwrap_err();
        assert!(matches!(err, RetrievalError::Embedding(_)));
    }

    #[tokio::test]
    async fn server_errors_surface_with_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(503).body("overloaded");
            })
            .await;

        let provider = HttpEmbeddingProvider::new(
            &format!("{}/v1/", server.base_url()),
            "test-model",
            None,
            3,
        )
        .unwrap();

        let err = provider.embed("anything").await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("503"), "message was: {message}");
    }
}
