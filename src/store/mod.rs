//! Storage backends for incident chunk rows and their embeddings.
//!
//! The [`VectorStore`] trait abstracts the persistence layer so the ingestion
//! pipelines and the search engine never depend on a concrete database. One
//! backend ships with the crate: [`sqlite::SqliteIncidentStore`], SQLite with
//! similarity search via `sqlite-vec`.
//!
//! ```text
//!  IngestionPipeline ──upsert_chunk──┐
//!  ReconcileIngestor ──insert_raw────┼──► VectorStore ──► chunks + chunks_vec
//!  HybridSearchEngine ◄──nearest_neighbors / count_rows──┘
//! ```
//!
//! The two writers differ in dedup granularity: the chunking pipeline is
//! content-addressed (`text_hash` uniqueness makes re-ingestion a no-op),
//! while reconciliation dedups at ticket granularity before it ever reaches
//! the store. Rows are append-only; nothing in this crate deletes them.

pub mod sqlite;

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::Result;

pub use sqlite::SqliteIncidentStore;

/// A chunk row ready for content-addressed insertion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewChunk {
    /// Stable business identifier of the owning ticket.
    pub issue_key: String,
    /// Optional service/queue tag used for filtered search.
    pub service: Option<String>,
    /// Whitespace-normalized display preview, computed once per document.
    pub snippet: String,
    /// Full chunk text, the content-addressing input.
    pub text_chunk: String,
    /// SHA-256 hex digest of `text_chunk`; unique across the store.
    pub text_hash: String,
    /// Embedding of `text_chunk`; length must match the store dimension.
    pub embedding: Vec<f32>,
}

/// A chunk row read back from the store, embedding omitted.
///
/// This is the reindex input: `text_chunk` gets re-embedded with a new
/// provider, the other columns are carried over verbatim. Rows written by
/// reconciliation have no snippet and no hash.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredChunk {
    pub issue_key: String,
    pub service: Option<String>,
    pub snippet: Option<String>,
    pub text_chunk: String,
    pub text_hash: Option<String>,
}

/// One similarity hit: the closest chunk of one ticket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkHit {
    pub issue_key: String,
    pub snippet: String,
    /// Higher is better; see [`VectorStore::nearest_neighbors`] for the
    /// distance-to-score transform.
    pub score: f32,
}

/// Unified interface over chunk storage backends.
///
/// Connectivity failures surface as [`crate::RetrievalError::Store`] and are
/// never retried here; retry policy belongs to the caller.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Creates the chunk table, its indexes, and the embedding table if
    /// absent. Idempotent and safe to call repeatedly or concurrently.
    ///
    /// Fails with [`crate::RetrievalError::Schema`] when the store was
    /// bootstrapped with a different embedding dimension; the schema is
    /// recreated by an operator, never mutated in place.
    async fn ensure_schema(&self, dimension: usize) -> Result<()>;

    /// Total number of chunk rows.
    async fn count_rows(&self) -> Result<u64>;

    /// Inserts a chunk unless its `text_hash` is already present.
    ///
    /// Returns `true` when a row was written, `false` for the silent
    /// duplicate no-op. Never errors on a hash collision.
    async fn upsert_chunk(&self, chunk: NewChunk) -> Result<bool>;

    /// Distinct issue keys currently present; coarse-grained dedup input for
    /// reconciliation.
    async fn existing_issue_keys(&self) -> Result<HashSet<String>>;

    /// Every chunk row in insertion order, without embeddings; the read side
    /// of [`crate::ingestion::reindex_corpus`].
    async fn all_chunks(&self) -> Result<Vec<StoredChunk>>;

    /// For each ticket, its single closest chunk to `query`, best first,
    /// at most `limit` tickets.
    ///
    /// Scores are `1.0 - cosine_distance`, so they increase with similarity
    /// and are comparable across calls against the same store.
    async fn nearest_neighbors(
        &self,
        query: &[f32],
        limit: usize,
        service_filter: Option<&str>,
    ) -> Result<Vec<ChunkHit>>;

    /// Unconditional insert used by reconciliation; the caller has already
    /// filtered out existing issue keys. No snippet or hash is stored.
    async fn insert_raw(&self, issue_key: &str, text: &str, embedding: &[f32]) -> Result<()>;
}
