//! Hybrid semantic retrieval and ingestion engine for service-desk incident
//! records.
//!
//! ```text
//! Corpus drops ──► ingestion::IngestionPipeline ──┐   (content-hash dedup)
//! Staged tickets ─► ingestion::ReconcileIngestor ─┼─► store::VectorStore
//!                                                 │
//! Raw query ──► search::HybridSearchEngine ◄──────┘   (reads only)
//!                  │        ▲
//!                  │        └── rephrase channel (optional, degradable)
//!                  └──► embedding::EmbeddingProvider
//! ```
//!
//! The two writers differ in dedup granularity and are both safe under
//! repeated re-runs: the chunking pipeline content-addresses every window of
//! a document, while reconciliation skips issue keys that are already
//! present. The search engine embeds the raw query and, when enabled, a
//! rephrased paraphrase, runs nearest-neighbor search per channel, and fuses
//! the per-ticket scores with fixed weights.

pub mod config;
pub mod embedding;
pub mod ingestion;
pub mod rephrase;
pub mod search;
pub mod store;
pub mod types;

pub use config::{ChunkingConfig, FusionWeights, RetrieverConfig};
pub use embedding::{EmbeddingProvider, HttpEmbeddingProvider, MockEmbeddingProvider, shared_embedder};
pub use ingestion::{
    BatchSource, IncidentDocument, IngestReport, IngestionPipeline, JsonLinesDirSource,
    ReconcileIngestor, StagedTicket, load_documents, reindex_corpus,
};
pub use rephrase::{HttpRephraseProvider, RephraseOutcome, RephraseProvider};
pub use search::{HybridSearchEngine, SearchRequest, TicketMatch};
pub use store::{ChunkHit, NewChunk, SqliteIncidentStore, StoredChunk, VectorStore};
pub use types::{RetrievalError, Result};
