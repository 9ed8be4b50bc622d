//! Embedding provider adapters.
//!
//! Everything downstream of this module (store schema, similarity ranking)
//! assumes unit-length vectors of a dimension that is fixed for the lifetime
//! of a store. Providers therefore expose [`EmbeddingProvider::dimension`]
//! explicitly instead of letting callers infer it from the first result.
//!
//! Two implementations ship with the crate:
//!
//! - [`HttpEmbeddingProvider`] talks to any OpenAI-compatible `/embeddings`
//!   endpoint.
//! - [`MockEmbeddingProvider`] produces deterministic pseudo-random unit
//!   vectors and backs the test suite.
//!
//! Model loads are expensive, so processes share one provider handle created
//! lazily on first use via [`shared_embedder`].

pub mod http;

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::types::{RetrievalError, Result};

pub use http::HttpEmbeddingProvider;

/// A text-embedding model adapter.
///
/// Implementations are stateless across calls once constructed and safe to
/// share behind an `Arc`.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier of the underlying model, for logs and diagnostics.
    fn id(&self) -> &str;

    /// Output dimension; constant for the lifetime of the provider.
    fn dimension(&self) -> usize;

    /// Embeds a batch of texts, one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embeds a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| {
            RetrievalError::Embedding("provider returned no vector for input".into())
        })
    }
}

/// Returns the process-wide embedding provider, constructing it on first use.
///
/// The handle is cached for the lifetime of the process and there is no
/// teardown contract; later calls ignore `init` and return the cached
/// provider regardless of the factory passed in.
pub fn shared_embedder(
    init: impl FnOnce() -> Arc<dyn EmbeddingProvider>,
) -> Arc<dyn EmbeddingProvider> {
    static SHARED: OnceLock<Arc<dyn EmbeddingProvider>> = OnceLock::new();
    SHARED.get_or_init(init).clone()
}

/// Deterministic embedding provider for tests and offline development.
///
/// Each input text is hashed and the digest seeds a pseudo-random unit
/// vector, so identical texts always map to identical embeddings while
/// distinct texts land far apart with overwhelming probability.
#[derive(Debug, Clone)]
pub struct MockEmbeddingProvider {
    dimension: usize,
}

impl MockEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        let mut state = u64::from_le_bytes(digest[..8].try_into().expect("digest is 32 bytes"));
        let mut vector = Vec::with_capacity(self.dimension);
        for _ in 0..self.dimension {
            // xorshift64 over the digest seed; cheap and deterministic.
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let unit = (state >> 11) as f64 / (1u64 << 53) as f64;
            vector.push((unit * 2.0 - 1.0) as f32);
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new(32)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn id(&self) -> &str {
        "mock-embedder"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.vector_for(text)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_embeddings_are_deterministic() {
        let provider = MockEmbeddingProvider::default();
        let inputs = vec![
            "printer offline".to_string(),
            "vpn drops every hour".to_string(),
            "printer offline".to_string(),
        ];

        let first = provider.embed_batch(&inputs).await.unwrap();
        let second = provider.embed_batch(&inputs).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first[0], first[2]);
        assert_ne!(first[0], first[1]);
    }

    #[test]
    fn shared_embedder_is_initialized_once() {
        let first = shared_embedder(|| Arc::new(MockEmbeddingProvider::new(8)));
        let second = shared_embedder(|| Arc::new(MockEmbeddingProvider::new(16)));
        // The second factory is ignored; both handles are the same provider.
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.dimension(), 8);
    }

    #[tokio::test]
    async fn mock_embeddings_are_unit_length() {
        let provider = MockEmbeddingProvider::new(48);
        let vector = provider.embed("disk full on build agent").await.unwrap();

        assert_eq!(vector.len(), 48);
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "norm was {norm}");
    }
}
