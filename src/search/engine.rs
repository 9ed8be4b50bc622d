//! Hybrid retrieval engine: raw and rephrased query channels over one store.

use std::sync::Arc;

use crate::config::RetrieverConfig;
use crate::embedding::EmbeddingProvider;
use crate::rephrase::{RephraseOutcome, RephraseProvider, rephrase_with_budget};
use crate::search::fusion::{TicketMatch, fuse_channels};
use crate::store::{ChunkHit, VectorStore};
use crate::types::{RetrievalError, Result};

/// Bounds on the number of returned tickets.
const TOP_K_MIN: usize = 1;
const TOP_K_MAX: usize = 100;

/// One search invocation.
#[derive(Clone, Debug)]
pub struct SearchRequest {
    /// Raw incident description as typed by the reporter.
    pub query: String,
    /// Requested result count; `None` uses the configured default. Clamped
    /// to `[1, 100]` either way.
    pub top_k: Option<usize>,
    /// Whether to attempt the rephrased channel for this request.
    pub use_rephrase: bool,
    /// Restrict matches to one service/queue.
    pub service: Option<String>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_k: None,
            use_rephrase: true,
            service: None,
        }
    }
}

/// Turns a raw query into a ranked list of similar tickets.
///
/// Two independent channels compensate for short or noisy incident
/// descriptions: the literal query and an optional cleaned-up paraphrase.
/// The store only ever performs ordinary nearest-neighbor search; all
/// cross-channel logic lives in [`fuse_channels`].
pub struct HybridSearchEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    rephraser: Option<Arc<dyn RephraseProvider>>,
    store: Arc<dyn VectorStore>,
    config: RetrieverConfig,
}

impl HybridSearchEngine {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        rephraser: Option<Arc<dyn RephraseProvider>>,
        store: Arc<dyn VectorStore>,
        config: RetrieverConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            embedder,
            rephraser,
            store,
            config,
        })
    }

    /// Runs one hybrid search.
    ///
    /// Fails with [`RetrievalError::NoDocuments`] when the store is empty at
    /// call time; a non-empty store with no matches returns an empty list.
    pub async fn search(&self, request: SearchRequest) -> Result<Vec<TicketMatch>> {
        let top_k = request
            .top_k
            .unwrap_or(self.config.default_top_k)
            .clamp(TOP_K_MIN, TOP_K_MAX);
        let fetch = self.config.overfetch(top_k);

        let raw_vector = self.embedder.embed(&request.query).await?;
        let rephrased_vector = self.rephrased_channel_vector(&request).await;

        if self.store.count_rows().await? == 0 {
            return Err(RetrievalError::NoDocuments);
        }

        let service = request.service.as_deref();
        let (raw_hits, rephrased_hits) = match &rephrased_vector {
            Some(vector) => {
                // Fusion is order-independent, so the channels can run
                // concurrently.
                let (raw, rephrased) = tokio::join!(
                    self.store.nearest_neighbors(&raw_vector, fetch, service),
                    self.store.nearest_neighbors(vector, fetch, service),
                );
                (raw?, rephrased?)
            }
            None => (
                self.store
                    .nearest_neighbors(&raw_vector, fetch, service)
                    .await?,
                Vec::<ChunkHit>::new(),
            ),
        };

        tracing::debug!(
            top_k,
            fetch,
            raw_hits = raw_hits.len(),
            rephrased_hits = rephrased_hits.len(),
            rephrased_channel = rephrased_vector.is_some(),
            "hybrid search executed"
        );
        Ok(fuse_channels(
            raw_hits,
            rephrased_hits,
            self.config.fusion,
            top_k,
        ))
    }

    /// Produces the rephrased-channel query vector, or `None` when the
    /// channel is absent.
    ///
    /// Every failure on this path degrades to `None`: the channel is an
    /// optional quality improvement and the raw channel has already
    /// succeeded by the time this runs.
    async fn rephrased_channel_vector(&self, request: &SearchRequest) -> Option<Vec<f32>> {
        if !request.use_rephrase || !self.config.use_rephrase {
            return None;
        }
        let rephraser = self.rephraser.as_deref()?;

        match rephrase_with_budget(rephraser, &request.query, self.config.rephrase_timeout).await {
            RephraseOutcome::Rewritten(text) => match self.embedder.embed(&text).await {
                Ok(vector) => Some(vector),
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        "failed to embed rephrased query; raw channel only"
                    );
                    None
                }
            },
            RephraseOutcome::Identity => None,
        }
    }
}
